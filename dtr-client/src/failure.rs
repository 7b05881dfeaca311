//! Turning failures of test code into summary lines.
//!
//! Test hooks return `anyhow::Result`; a returned error becomes its message,
//! its cause chain, the debug form of its root cause and a backtrace bounded
//! to [`MAX_TRACE_FRAMES`] frames. Panics are caught and summarized with the
//! panic location and the backtrace recorded at the panic site, so a
//! panicking test fails its attempt instead of taking the process down.
//! Backtraces are always captured, whatever `RUST_BACKTRACE` says.

use std::any::Any;
use std::backtrace::{Backtrace, BacktraceStatus};
use std::cell::RefCell;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Once;

/// Maximum number of backtrace frames kept in a failure summary.
pub const MAX_TRACE_FRAMES: usize = 16;

/// Leading frames that belong to the capture machinery, not to the failure.
const CAPTURE_FRAME_PREFIXES: &[&str] = &[
    "std::backtrace",
    "std::panicking",
    "std::panic::",
    "core::panicking",
    "core::panic::",
    "rust_begin_unwind",
    "__rustc",
    "<alloc::boxed::Box<F,A> as core::ops::function::Fn",
    "dtr_client::failure::guarded",
    "dtr_client::failure::error_summary",
    "dtr_client::failure::install_panic_capture",
    "dtr_client::failure::StepFailure",
];

/// What the panic hook saw for the last panic on this thread.
struct PanicCapture {
    location: Option<String>,
    backtrace: Backtrace,
}

thread_local! {
    static LAST_PANIC: RefCell<Option<PanicCapture>> = const { RefCell::new(None) };
}

static PANIC_HOOK: Once = Once::new();

/// Chain a hook that records location and backtrace of every panic.
fn install_panic_capture() {
    PANIC_HOOK.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            let capture = PanicCapture {
                location: info.location().map(ToString::to_string),
                backtrace: Backtrace::force_capture(),
            };
            LAST_PANIC.with(|slot| *slot.borrow_mut() = Some(capture));
            previous(info);
        }));
    });
}

/// A failed step of an attempt, already rendered as summary lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepFailure {
    pub lines: Vec<String>,
    /// An interrupt was consumed while handling this step.
    pub interrupted: bool,
}

impl StepFailure {
    pub fn from_error(err: &anyhow::Error) -> Self {
        Self {
            lines: error_summary(err),
            interrupted: false,
        }
    }

    /// Summarize a caught panic, using what the panic hook recorded on this thread.
    pub fn from_panic(payload: &(dyn Any + Send)) -> Self {
        Self {
            lines: panic_summary(payload, LAST_PANIC.take()),
            interrupted: false,
        }
    }

    pub fn interrupted() -> Self {
        Self {
            lines: vec!["Interrupted".to_string()],
            interrupted: true,
        }
    }

    /// Lines joined for a single log message.
    pub fn message(&self) -> String {
        self.lines.join("\n")
    }
}

/// Run a test hook, converting both errors and panics into a [`StepFailure`].
pub fn guarded<T>(step: impl FnOnce() -> anyhow::Result<T>) -> Result<T, StepFailure> {
    install_panic_capture();
    LAST_PANIC.take();
    match catch_unwind(AssertUnwindSafe(step)) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(StepFailure::from_error(&err)),
        Err(payload) => Err(StepFailure::from_panic(payload.as_ref())),
    }
}

/// Message, cause chain, root cause and bounded backtrace of `err`.
///
/// The error's own backtrace is used when one was captured at its creation;
/// otherwise one is captured here.
pub fn error_summary(err: &anyhow::Error) -> Vec<String> {
    let mut lines: Vec<String> = err.to_string().lines().map(str::to_string).collect();
    for cause in err.chain().skip(1) {
        lines.push(format!("Caused by: {cause}"));
    }
    lines.push(format!("Error: {:?}", err.root_cause()));

    let backtrace = err.backtrace();
    let rendered = if backtrace.status() == BacktraceStatus::Captured {
        backtrace.to_string()
    } else {
        Backtrace::force_capture().to_string()
    };
    push_backtrace(&mut lines, &rendered);
    lines
}

fn panic_summary(payload: &(dyn Any + Send), capture: Option<PanicCapture>) -> Vec<String> {
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string());
    let mut lines = vec![];
    let mut parts = message.lines();
    lines.push(format!("panicked: {}", parts.next().unwrap_or_default()));
    lines.extend(parts.map(str::to_string));

    let (location, rendered) = match capture {
        Some(capture) => (capture.location, capture.backtrace.to_string()),
        None => (None, Backtrace::force_capture().to_string()),
    };
    if let Some(location) = location {
        lines.push(format!("Panic location: {location}"));
    }
    push_backtrace(&mut lines, &rendered);
    lines
}

fn push_backtrace(lines: &mut Vec<String>, rendered: &str) {
    let frames = bounded_frames(rendered, MAX_TRACE_FRAMES);
    if !frames.is_empty() {
        lines.push("Backtrace:".to_string());
        lines.extend(frames);
    }
}

/// Split a rendered backtrace into frames: a header like
/// `  12: crate::module::function` plus the `at file:line` lines after it.
fn split_frames(rendered: &str) -> Vec<Vec<&str>> {
    let mut frames: Vec<Vec<&str>> = Vec::new();
    for line in rendered.lines() {
        if is_frame_header(line) {
            frames.push(vec![line]);
        } else if let Some(frame) = frames.last_mut() {
            frame.push(line);
        }
    }
    frames
}

/// Keep the lines of the first `max_frames` frames after the capture machinery.
fn bounded_frames(rendered: &str, max_frames: usize) -> Vec<String> {
    let frames = split_frames(rendered);
    let skipped = frames
        .iter()
        .take_while(|frame| is_capture_frame(frame[0]))
        .count();
    let relevant = &frames[skipped..];

    let mut kept: Vec<String> = relevant
        .iter()
        .take(max_frames)
        .flatten()
        .map(|line| (*line).to_string())
        .collect();
    if relevant.len() > max_frames {
        kept.push(format!("  ... {} more frames", relevant.len() - max_frames));
    }
    kept
}

fn frame_symbol(header: &str) -> &str {
    header
        .trim_start()
        .split_once(':')
        .map_or("", |(_, symbol)| symbol.trim())
}

fn is_capture_frame(header: &str) -> bool {
    let symbol = frame_symbol(header);
    CAPTURE_FRAME_PREFIXES
        .iter()
        .any(|prefix| symbol.starts_with(prefix))
}

fn is_frame_header(line: &str) -> bool {
    let trimmed = line.trim_start();
    match trimmed.split_once(':') {
        Some((index, _)) => !index.is_empty() && index.bytes().all(|b| b.is_ascii_digit()),
        None => false,
    }
}
