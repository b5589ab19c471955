//! Scoped capture of the process-wide stdout/stderr descriptors.
//!
//! Janet writes straight to the C `stdout`/`stderr` streams, so the only
//! way to observe its output per request is to point descriptors 1 and 2
//! at private pipes for the duration of the call. The redirection is
//! process-wide: [`capture`] holds a global lock for its whole duration,
//! and any other thread writing to the process streams meanwhile ends up
//! in the capture as well.

use super::error::CaptureError;
use super::value::Output;
use std::fs::File;
use std::io::{self, Read, Write};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::sync::{Mutex, PoisonError};
use std::thread;

static CAPTURE_LOCK: Mutex<()> = Mutex::new(());

/// Result of a captured operation.
#[derive(Debug)]
pub struct Captured<T> {
    pub value: T,
    pub output: Output,
}

struct Pipe {
    reader: File,
    writer: OwnedFd,
}

impl Pipe {
    fn open(stream: &'static str) -> Result<Self, CaptureError> {
        let mut fds: [libc::c_int; 2] = [-1; 2];
        // SAFETY: `fds` has room for the two descriptors pipe(2) writes.
        if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
            return Err(CaptureError::Pipe {
                stream,
                source: io::Error::last_os_error(),
            });
        }
        // SAFETY: both descriptors were just created and nothing else owns them.
        let (reader, writer) = unsafe { (File::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };
        Ok(Self { reader, writer })
    }
}

/// Points `target` at a pipe until dropped.
struct Redirect {
    stream: &'static str,
    target: RawFd,
    saved: OwnedFd,
}

impl Redirect {
    /// Consumes `writer`: after this returns, `target` holds the only
    /// reference to the pipe's write end, so restoring it delivers EOF.
    fn install(stream: &'static str, target: RawFd, writer: OwnedFd) -> Result<Self, CaptureError> {
        let redirect_error = |source| CaptureError::Redirect { stream, source };

        flush_process_streams();

        // SAFETY: dup(2) on a descriptor number; failure is reported via -1.
        let saved = unsafe { libc::dup(target) };
        if saved < 0 {
            return Err(redirect_error(io::Error::last_os_error()));
        }
        // SAFETY: `saved` is a fresh descriptor owned by nobody else.
        let saved = unsafe { OwnedFd::from_raw_fd(saved) };

        // SAFETY: both descriptors are open for the duration of the call.
        if unsafe { libc::dup2(writer.as_raw_fd(), target) } < 0 {
            return Err(redirect_error(io::Error::last_os_error()));
        }

        Ok(Self {
            stream,
            target,
            saved,
        })
    }
}

impl Drop for Redirect {
    fn drop(&mut self) {
        flush_process_streams();
        // SAFETY: `saved` stays open until this guard is gone.
        if unsafe { libc::dup2(self.saved.as_raw_fd(), self.target) } < 0 {
            let err = io::Error::last_os_error();
            tracing::error!(stream = self.stream, error = %err, "failed to restore stream");
        }
    }
}

/// Push out everything buffered for descriptors 1 and 2, both Rust's
/// handles and every C `FILE*` the runtime may have written to.
fn flush_process_streams() {
    let _ = io::stdout().flush();
    let _ = io::stderr().flush();
    // SAFETY: fflush(NULL) flushes all open output streams.
    unsafe {
        libc::fflush(std::ptr::null_mut());
    }
}

fn drain(mut reader: File) -> io::Result<String> {
    let mut buf = Vec::new();
    reader.read_to_end(&mut buf)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

fn collect(stream: &str, joined: thread::Result<io::Result<String>>) -> String {
    match joined {
        Ok(Ok(text)) => text,
        Ok(Err(err)) => {
            tracing::warn!(stream, error = %err, "failed to drain captured output");
            String::new()
        }
        Err(_) => {
            tracing::warn!(stream, "capture reader thread panicked");
            String::new()
        }
    }
}

/// Run `op` with stdout and stderr redirected into private buffers.
///
/// The original descriptors are restored as soon as `op` returns (or
/// unwinds), before the captured text is collected. Pipes are drained on
/// reader threads while `op` runs, so output larger than the pipe buffer
/// does not stall the writer. If a pipe cannot be created, `op` never runs.
pub fn capture<T>(op: impl FnOnce() -> T) -> Result<Captured<T>, CaptureError> {
    let _exclusive = CAPTURE_LOCK.lock().unwrap_or_else(PoisonError::into_inner);

    let stdout_pipe = Pipe::open("stdout")?;
    let stderr_pipe = Pipe::open("stderr")?;

    thread::scope(|scope| -> Result<Captured<T>, CaptureError> {
        let Pipe {
            reader: out_reader,
            writer: out_writer,
        } = stdout_pipe;
        let Pipe {
            reader: err_reader,
            writer: err_writer,
        } = stderr_pipe;

        let stdout_task = scope.spawn(move || drain(out_reader));
        let stderr_task = scope.spawn(move || drain(err_reader));

        let value = {
            let _stdout = Redirect::install("stdout", libc::STDOUT_FILENO, out_writer)?;
            let _stderr = Redirect::install("stderr", libc::STDERR_FILENO, err_writer)?;
            op()
        };

        let output = Output {
            stdout: collect("stdout", stdout_task.join()),
            stderr: collect("stderr", stderr_task.join()),
        };
        Ok(Captured { value, output })
    })
}
