//! Simulation orchestrator.
//!
//! Owns one virtual [`Clock`] and one external CPU core per session and
//! drives execution in bounded batches. Firmware compiled for simulation
//! ends each scan cycle in WFI; when the core reports it is waiting, the
//! batch loop fast-forwards the clock straight to the next alarm (typically
//! the 1 ms system tick) instead of grinding through idle cycles, which is
//! what lets the simulation hold near real-time speed.
//!
//! Control is returned to the caller after every batch as a
//! [`BatchSchedule`]: the embedding event loop decides when to call
//! [`Simulator::execute_batch`] again, so inbound UART traffic can be
//! serviced between batches.

pub mod uart;


use anyhow::{Context, Result};
use plcsim_config::ChipDescriptor;
use plcsim_core::{Clock, CpuCore};
use plcsim_loader::load_uf2;
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uart::UartBridge;

/// Instruction-loop budget of one batch. Large enough to amortize
/// scheduling overhead, small enough that host I/O is serviced often.
pub const ITERATIONS_PER_BATCH: u64 = 1_000_000;

/// What the driver should do after a batch returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchSchedule {
    /// The session ended; no further batches.
    Stopped,
    /// Simulated time is at or behind wall time; run the next batch as
    /// soon as the host has drained its I/O.
    Immediate,
    /// Simulated time ran ahead of wall time; wait this long first.
    After(Duration),
}

struct Session<C> {
    core: C,
    clock: Clock,
    cycle_nanos: u64,
    wall_start: Instant,
    sim_start: u64,
}

/// Lifecycle: Idle -> Running -> Idle. A session bundles the core and the
/// clock so neither can exist without the other; `load_and_run` while
/// running stops the previous session first.
pub struct Simulator<C, F> {
    frequency: u64,
    factory: F,
    session: Option<Session<C>>,
    uart: UartBridge,
}

impl<C: CpuCore, F: FnMut(Clock) -> C> Simulator<C, F> {
    /// `factory` builds the external CPU core around a clock handle; the
    /// core registers its peripheral timers as alarms on that clock.
    pub fn new(frequency: u64, factory: F) -> Self {
        Self {
            frequency,
            factory,
            session: None,
            uart: UartBridge::new(),
        }
    }

    pub fn from_chip(chip: &ChipDescriptor, factory: F) -> Self {
        Self::new(chip.clock_hz, factory)
    }

    /// Reads a UF2 container, programs it into a fresh core's flash and
    /// starts execution, running the first batch synchronously.
    ///
    /// An unreadable file is the only error: it propagates before any new
    /// session exists (the previous session is already stopped). Malformed
    /// container contents are not an error at this layer.
    pub fn load_and_run(&mut self, path: &Path) -> Result<BatchSchedule> {
        self.stop();

        let data = std::fs::read(path)
            .with_context(|| format!("Failed to read firmware container: {:?}", path))?;

        let clock = Clock::new(self.frequency);
        let mut core = (self.factory)(clock.clone());
        load_uf2(&data, &mut core);

        let sender = self.uart.sender();
        core.set_uart_tx_hook(Some(Box::new(move |byte| sender.send(byte))));

        let reset_pc = core.flash_base();
        core.set_pc(reset_pc);

        info!(
            "Loaded {} byte firmware container, starting execution at {:#x}",
            data.len(),
            reset_pc
        );

        // Cycle duration rounded to the nearest nanosecond. Sub-nanosecond
        // fractions are not tracked, so frequencies that do not divide 1e9
        // accumulate a small simulated-time drift (48 MHz runs on 21 ns
        // cycles instead of 20.83 ns).
        let cycle_nanos = ((1_000_000_000 + self.frequency / 2) / self.frequency).max(1);

        self.session = Some(Session {
            core,
            clock,
            cycle_nanos,
            wall_start: Instant::now(),
            sim_start: 0,
        });
        Ok(self.execute_batch())
    }

    /// Runs one bounded batch of instruction execution / idle fast-forward
    /// and reports when the next batch should run.
    ///
    /// A WFI fast-forward is charged against the iteration budget as the
    /// number of cycles it skipped, so a long idle wait still ends the
    /// batch and yields to the host.
    pub fn execute_batch(&mut self) -> BatchSchedule {
        let Some(session) = self.session.as_mut() else {
            return BatchSchedule::Stopped;
        };

        let mut fault = None;
        let mut i: u64 = 0;
        while i < ITERATIONS_PER_BATCH {
            if session.core.is_waiting() {
                let idle = session.clock.nanos_to_next_alarm();
                session.clock.tick(idle);
                i += idle / session.cycle_nanos;
            } else {
                match session.core.execute_instruction() {
                    Ok(cycles) => session.clock.tick(u64::from(cycles) * session.cycle_nanos),
                    Err(e) => {
                        fault = Some(e);
                        break;
                    }
                }
            }
            i += 1;
        }

        if let Some(e) = fault {
            warn!("CPU core fault: {}; stopping simulation", e);
            self.stop();
            return BatchSchedule::Stopped;
        }

        // Pace simulated time against wall time. Running ahead would
        // desynchronize protocol traffic riding on the emulated UART;
        // running behind just means the next batch starts immediately.
        let sim_elapsed_ms = (session.clock.nanos() - session.sim_start) as f64 / 1e6;
        let wall_elapsed_ms = session.wall_start.elapsed().as_secs_f64() * 1e3;
        let ahead_ms = sim_elapsed_ms - wall_elapsed_ms;
        if ahead_ms > 1.0 {
            debug!("Simulation {:.1} ms ahead of wall clock", ahead_ms);
            BatchSchedule::After(Duration::from_millis(ahead_ms as u64))
        } else {
            BatchSchedule::Immediate
        }
    }

    /// Blocking driver: executes batches until the session ends, sleeping
    /// out the pacing delays.
    pub fn run(&mut self) {
        loop {
            match self.execute_batch() {
                BatchSchedule::Stopped => break,
                BatchSchedule::Immediate => {}
                BatchSchedule::After(delay) => std::thread::sleep(delay),
            }
        }
    }

    /// Injects one host-to-device byte into the emulated UART receive
    /// path. No-op while idle.
    pub fn feed_byte(&mut self, byte: u8) {
        if let Some(session) = self.session.as_mut() {
            session.core.feed_uart_byte(byte);
        }
    }

    /// Replaces the callback invoked for each device-transmitted byte.
    /// The callback outlives individual sessions.
    pub fn set_uart_sink(&mut self, sink: impl FnMut(u8) + 'static) {
        self.uart.set_sink(sink);
    }

    pub fn clear_uart_sink(&mut self) {
        self.uart.clear_sink();
    }

    /// Tears the session down and returns to idle. Safe to call when
    /// already idle, and safe to call repeatedly.
    pub fn stop(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.core.set_uart_tx_hook(None);
            info!(
                "Simulation stopped after {} ns simulated time",
                session.clock.nanos()
            );
        }
    }

    pub fn is_running(&self) -> bool {
        self.session.is_some()
    }
}
