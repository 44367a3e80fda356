//! Call stack implementation
//!
//! This module provides the call stack for function execution:
//! - [`Stack`]: The call stack containing frames, backed by a [`Segment`]
//! - [`StackFrame`]: A single function's activation record
//!
//! Every local of a function gets its storage when the frame is pushed; block
//! scoping is resolved at compile time, so a frame is just a list of slot
//! addresses indexed by local id. Popping a frame releases its storage.

use super::segment::Segment;
use super::value::Address;
use super::MemoryError;

/// Stack frame for a function call
#[derive(Debug, Clone)]
pub struct StackFrame {
    pub function_name: String,
    /// Index of the loaded module the function belongs to
    pub module: usize,
    pub locals: Vec<Address>,
    mark: usize,
}

impl StackFrame {
    pub fn local(&self, index: usize) -> Option<Address> {
        self.locals.get(index).copied()
    }
}

/// The call stack
#[derive(Debug, Clone)]
pub struct Stack {
    segment: Segment,
    frames: Vec<StackFrame>,
}

impl Stack {
    pub fn new(base: Address, capacity: usize) -> Self {
        Stack {
            segment: Segment::new("stack", base, capacity),
            frames: Vec::new(),
        }
    }

    /// Push a new stack frame with storage for locals of the given sizes
    pub fn push_frame(
        &mut self,
        function_name: &str,
        module: usize,
        local_sizes: &[usize],
    ) -> Result<&StackFrame, MemoryError> {
        let mark = self.segment.used();
        let mut locals = Vec::with_capacity(local_sizes.len());
        for &size in local_sizes {
            match self.segment.allocate(size, false) {
                Ok(address) => locals.push(address),
                Err(err) => {
                    self.segment.release_to(mark);
                    return Err(err);
                }
            }
        }
        self.frames.push(StackFrame {
            function_name: function_name.to_string(),
            module,
            locals,
            mark,
        });
        Ok(&self.frames[self.frames.len() - 1])
    }

    /// Pop the top stack frame, releasing its storage
    pub fn pop_frame(&mut self) -> Option<StackFrame> {
        let frame = self.frames.pop()?;
        self.segment.release_to(frame.mark);
        Some(frame)
    }

    /// Get the current (top) frame
    pub fn current_frame(&self) -> Option<&StackFrame> {
        self.frames.last()
    }

    /// Get the depth of the call stack
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn segment(&self) -> &Segment {
        &self.segment
    }

    pub fn segment_mut(&mut self) -> &mut Segment {
        &mut self.segment
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frames_release_storage() {
        let mut stack = Stack::new(0x4000_0000, 1024);
        let outer = stack.push_frame("outer", 0, &[4, 8]).unwrap().locals.clone();
        let inner = stack.push_frame("inner", 0, &[4]).unwrap().locals.clone();
        assert_eq!(stack.depth(), 2);
        assert!(inner[0] > outer[1]);

        stack.pop_frame();
        let again = stack.push_frame("inner", 0, &[4]).unwrap().locals.clone();
        assert_eq!(again, inner);
    }

    #[test]
    fn test_frame_overflow_leaves_stack_intact() {
        let mut stack = Stack::new(0x4000_0000, 16);
        stack.push_frame("a", 0, &[8]).unwrap();
        assert!(stack.push_frame("b", 0, &[8, 8]).is_err());
        assert_eq!(stack.depth(), 1);
        assert_eq!(stack.segment().used(), 8);
    }
}
