//! SCPI error codes and the per-session error queue.

use std::collections::VecDeque;

pub const ERR_COMMAND: i16 = -100;
pub const ERR_DATA_TYPE: i16 = -104;
pub const ERR_MISSING_PARAMETER: i16 = -109;
pub const ERR_UNDEFINED_HEADER: i16 = -113;
pub const ERR_ILLEGAL_PARAMETER_VALUE: i16 = -224;
pub const ERR_QUEUE_OVERFLOW: i16 = -350;

/// Depth of the error queue.
pub const ERROR_QUEUE_DEPTH: usize = 17;

pub fn error_text(code: i16) -> &'static str {
    match code {
        0 => "No error",
        ERR_COMMAND => "Command error",
        ERR_DATA_TYPE => "Data type error",
        ERR_MISSING_PARAMETER => "Missing parameter",
        ERR_UNDEFINED_HEADER => "Undefined header",
        ERR_ILLEGAL_PARAMETER_VALUE => "Illegal parameter value",
        ERR_QUEUE_OVERFLOW => "Queue overflow",
        _ => "Device-specific error",
    }
}

/// FIFO of pending error codes, drained by `SYSTem:ERRor?`. When the
/// queue is full the newest slot collapses into `-350,"Queue overflow"`.
#[derive(Debug, Default)]
pub struct ErrorQueue {
    queue: VecDeque<i16>,
}

impl ErrorQueue {
    pub fn push(&mut self, code: i16) {
        if self.queue.len() >= ERROR_QUEUE_DEPTH {
            if let Some(last) = self.queue.back_mut() {
                *last = ERR_QUEUE_OVERFLOW;
            }
        } else {
            self.queue.push_back(code);
        }
    }

    pub fn pop(&mut self) -> Option<i16> {
        self.queue.pop_front()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn clear(&mut self) {
        self.queue.clear();
    }
}

/// Render one queue entry the way `SYSTem:ERRor?` reports it.
pub fn format_error(code: i16) -> String {
    format!("{},\"{}\"", code, error_text(code))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_order() {
        let mut q = ErrorQueue::default();
        q.push(ERR_ILLEGAL_PARAMETER_VALUE);
        q.push(ERR_COMMAND);
        assert_eq!(q.pop(), Some(ERR_ILLEGAL_PARAMETER_VALUE));
        assert_eq!(q.pop(), Some(ERR_COMMAND));
        assert_eq!(q.pop(), None);
    }

    #[test]
    fn overflow_collapses_newest_entry() {
        let mut q = ErrorQueue::default();
        for _ in 0..ERROR_QUEUE_DEPTH {
            q.push(ERR_COMMAND);
        }
        q.push(ERR_DATA_TYPE);
        assert_eq!(q.len(), ERROR_QUEUE_DEPTH);
        let mut last = 0;
        while let Some(code) = q.pop() {
            last = code;
        }
        assert_eq!(last, ERR_QUEUE_OVERFLOW);
    }

    #[test]
    fn formatting_matches_the_standard() {
        assert_eq!(format_error(0), "0,\"No error\"");
        assert_eq!(
            format_error(ERR_ILLEGAL_PARAMETER_VALUE),
            "-224,\"Illegal parameter value\""
        );
    }
}
