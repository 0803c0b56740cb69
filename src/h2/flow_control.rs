//! HTTP/2 flow control window bookkeeping, grounded on carllerche-h2's
//! `proto::streams::flow_control::FlowControl`.

pub type WindowSize = u32;

#[derive(Debug)]
pub struct FlowControlError;

#[derive(Debug, Clone, Copy)]
pub struct FlowControl {
    /// Total window as last advertised; may go negative transiently
    /// when SETTINGS_INITIAL_WINDOW_SIZE shrinks mid-stream.
    window_size: i32,
    /// Capacity actually available to claim right now.
    available: WindowSize,
}

impl FlowControl {
    pub fn new(initial_window: u32) -> Self {
        Self { window_size: initial_window as i32, available: initial_window }
    }

    pub fn window_size(&self) -> i32 {
        self.window_size
    }

    pub fn available(&self) -> WindowSize {
        self.available
    }

    pub fn has_unavailable(&self) -> bool {
        self.window_size as i64 > self.available as i64
    }

    /// Claims `capacity` bytes of the available window for an outgoing
    /// DATA frame, returning how much was actually claimed (less than
    /// requested if the window is smaller).
    pub fn claim_capacity(&mut self, capacity: WindowSize) -> WindowSize {
        let claimed = capacity.min(self.available);
        self.available -= claimed;
        claimed
    }

    /// Returns capacity to the caller's disposal without a WINDOW_UPDATE
    /// (e.g. a claimed-but-unsent DATA frame being abandoned).
    pub fn assign_capacity(&mut self, capacity: WindowSize) {
        self.available = self.available.saturating_add(capacity);
    }

    /// Applies a WINDOW_UPDATE increment, growing both the nominal
    /// window and available capacity.
    pub fn inc_window(&mut self, sz: u32) -> Result<(), FlowControlError> {
        let (new_window, overflowed) = self.window_size.overflowing_add(sz as i32);
        if overflowed || new_window as i64 > i32::MAX as i64 {
            return Err(FlowControlError);
        }
        self.window_size = new_window;
        self.available = self.available.saturating_add(sz);
        Ok(())
    }

    /// Accounts for `sz` bytes of DATA actually sent, shrinking the
    /// nominal window (available was already decremented by
    /// `claim_capacity`).
    pub fn send_data(&mut self, sz: WindowSize) {
        self.window_size -= sz as i32;
    }

    /// Accounts for `sz` bytes of inbound DATA received, shrinking our
    /// receive-side window. Returns `err` if this would underflow.
    pub fn buffer_data<E>(&mut self, sz: WindowSize, err: E) -> Result<(), E> {
        if sz as i64 > self.window_size as i64 {
            return Err(err);
        }
        self.window_size -= sz as i32;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claim_capacity_is_bounded_by_available() {
        let mut fc = FlowControl::new(100);
        assert_eq!(fc.claim_capacity(150), 100);
        assert_eq!(fc.available(), 0);
    }

    #[test]
    fn window_update_grows_both_window_and_available() {
        let mut fc = FlowControl::new(0);
        fc.inc_window(500).unwrap();
        assert_eq!(fc.window_size(), 500);
        assert_eq!(fc.available(), 500);
    }

    #[test]
    fn send_data_shrinks_window_independent_of_available() {
        let mut fc = FlowControl::new(1000);
        let claimed = fc.claim_capacity(400);
        fc.send_data(claimed);
        assert_eq!(fc.window_size(), 600);
        assert_eq!(fc.available(), 600);
    }
}
