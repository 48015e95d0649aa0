//! Local terminal frontend for the `labshell` binary.

pub mod console;
pub mod keys;

pub use console::{
    describe, menu_line, render_form, ConsoleNotifier, ConsolePrompt, ConsoleSession,
    ConsoleSurface, PromptSlot, RawModeGuard, StdoutWriter, Tone,
};
pub use keys::MenuAction;
