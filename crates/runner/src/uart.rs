//! Byte-level bridge between the emulated UART and the external protocol
//! layer (in the IDE, a Modbus-over-serial client).

use std::cell::RefCell;
use std::rc::Rc;

type SinkFn = Rc<RefCell<dyn FnMut(u8)>>;
type Sink = Rc<RefCell<Option<SinkFn>>>;

/// Host-side half of the bridge. The sink callback is owned here and
/// survives session teardown; only the transmit hook installed on the CPU
/// core is detached when a session stops.
#[derive(Default)]
pub struct UartBridge {
    sink: Sink,
}

impl UartBridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the callback invoked once per device-transmitted byte.
    pub fn set_sink(&self, sink: impl FnMut(u8) + 'static) {
        *self.sink.borrow_mut() = Some(Rc::new(RefCell::new(sink)));
    }

    pub fn clear_sink(&self) {
        *self.sink.borrow_mut() = None;
    }

    /// Device-side handle, suitable for installing on the core as its
    /// transmit hook.
    pub fn sender(&self) -> UartSender {
        UartSender {
            sink: Rc::clone(&self.sink),
        }
    }
}

#[derive(Clone)]
pub struct UartSender {
    sink: Sink,
}

impl UartSender {
    /// Forwards one byte to the sink, if one is installed.
    ///
    /// The slot borrow is released before the callback runs, so a sink may
    /// replace or clear itself re-entrantly; a byte already in flight still
    /// reaches the callback it was dispatched to.
    pub fn send(&self, byte: u8) {
        let cb = self.sink.borrow().as_ref().map(Rc::clone);
        if let Some(cb) = cb {
            (cb.borrow_mut())(byte);
        }
    }
}
