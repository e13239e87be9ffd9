//! The frame stack and call frame management.
//!
//! This module exposes:
//! - [`FrameStack`]: The frame stack used by the [`Cpu`].
//! - [`Frame`]: All the data from a given frame.
//!
//! [`Cpu`]: super::Cpu

use crate::bits::VirtualAddress;

/// Where this frame came from.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum FrameType {
    /// Frame came from a `CALL`.
    Subroutine,
    /// Frame came from an `INT` (or [`Cpu::int`]).
    ///
    /// [`Cpu::int`]: super::Cpu::int
    Interrupt,
    /// Frame came from a `SYSENTER`.
    SystemCall
}

/// A frame entry, which defines all the known information about a frame.
///
/// This information is only kept if the `debug_frames` flag is enabled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// The address of the caller instruction.
    pub caller_addr: VirtualAddress,

    /// The address the call jumped to.
    pub callee_addr: VirtualAddress,

    /// The vector, for interrupt frames.
    pub vector: Option<u32>,

    /// Whether this frame is from a subroutine call, interrupt or system call.
    pub frame_type: FrameType,

    /// The stack pointer after the return address was pushed.
    pub stack_pointer: VirtualAddress
}

/// The stack of call frames.
///
/// This struct is used within the [`Cpu`] to keep track of calls.
/// The amount of information it keeps track of depends on the `debug_frames` flag.
/// - If the `debug_frames` flag is true, this keeps track of a Vec of [`Frame`]s.
/// - If the `debug_frames` flag is false, this only keeps track of the number of frames traversed.
///
/// [`Cpu`]: super::Cpu
#[derive(Debug, Clone)]
pub struct FrameStack {
    /// The number of frames traversed.
    ///
    /// At top level execution, `frame_no` == 0.
    /// Every call (`CALL`, `INT`, `SYSENTER`) increments this value,
    /// and every return (`RET`, `IRET`, `SYSEXIT`) decrements it.
    frame_no: u64,

    /// The frames.
    ///
    /// If `None`, frames are not being tracked.
    frames: Option<Vec<Frame>>
}

impl FrameStack {
    /// Creates a new frame stack.
    pub(super) fn new(debug_frames: bool) -> Self {
        Self {
            frame_no: 0,
            frames: debug_frames.then(Vec::new)
        }
    }

    /// Gets the current number of frames entered.
    pub fn len(&self) -> u64 {
        self.frame_no
    }

    /// Tests whether the frame stack is at top level execution.
    pub fn is_empty(&self) -> bool {
        self.frame_no == 0
    }

    /// Gets the list of current frames (if debug frames are enabled).
    pub fn frames(&self) -> Option<&[Frame]> {
        self.frames.as_deref()
    }

    /// Pushes a new frame to the frame stack.
    pub(super) fn push_frame(&mut self, frame: Frame) {
        self.frame_no += 1;
        if let Some(frames) = self.frames.as_mut() {
            frames.push(frame);
        }
    }

    /// Pops a frame from the frame stack.
    ///
    /// Returns at top level leave the count at zero.
    pub(super) fn pop_frame(&mut self) {
        self.frame_no = self.frame_no.saturating_sub(1);
        if let Some(frames) = self.frames.as_mut() {
            frames.pop();
        }
    }
}
impl Default for FrameStack {
    fn default() -> Self {
        Self::new(false)
    }
}
