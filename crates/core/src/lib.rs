pub mod clock;

pub use clock::{Alarm, Clock};

#[derive(Debug, thiserror::Error)]
pub enum SimulationError {
    #[error("Memory access violation at {0:#x}")]
    MemoryViolation(u32),
    #[error("Instruction decoding error at {0:#x}")]
    DecodeError(u32),
}

pub type SimResult<T> = Result<T, SimulationError>;

/// Capability contract for the external CPU-core component.
///
/// The core is constructed around a [`Clock`] handle and consumes it for
/// timing (peripheral timers request alarms from it). The simulation
/// orchestrator only ever talks to the core through this trait: it fills
/// flash, points the program counter at the reset address, and then steps
/// the core one instruction at a time.
pub trait CpuCore {
    /// Absolute address of the first flash byte.
    fn flash_base(&self) -> u32;

    /// Capacity of the flash region in bytes.
    fn flash_size(&self) -> usize;

    /// Bulk-writes `data` into flash starting at `offset` (relative to
    /// [`flash_base`](CpuCore::flash_base)).
    fn write_flash(&mut self, data: &[u8], offset: usize);

    /// Points the program counter at an absolute address.
    fn set_pc(&mut self, addr: u32);

    /// Executes exactly one instruction and reports the cycles it consumed.
    fn execute_instruction(&mut self) -> SimResult<u32>;

    /// True while the core sits in a WFI-style idle state, making no
    /// progress until a timer or external event arrives.
    fn is_waiting(&self) -> bool;

    /// Installs (or with `None`, detaches) the per-byte UART transmit hook.
    fn set_uart_tx_hook(&mut self, hook: Option<Box<dyn FnMut(u8)>>);

    /// Injects one host-to-device byte into the UART receive path.
    fn feed_uart_byte(&mut self, byte: u8);
}
