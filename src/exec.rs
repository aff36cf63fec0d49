//! Subprocess execution with multiplexed child file descriptors.
//!
//! Callers describe each child descriptor they care about with an
//! [`IoSpec`]: the child-side fd number, the direction of interest, and a
//! handler. The runner wires every handled descriptor to a CLOEXEC
//! socketpair (dup2'd onto the requested number just before exec),
//! descriptors without a handler to `/dev/null`, then polls the parent
//! ends and dispatches handlers in declaration order within each poll
//! tick. The loop ends at the first hang-up, after which the child is
//! reaped.
//!
//! Children running inside the target chroot get a fixed minimal
//! environment; chroot and chdir happen in a pre-exec hook, so their
//! failure surfaces as a spawn error in the parent.

use std::io::{self, Read};
use std::os::fd::{AsFd, AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::net::UnixStream;
use std::os::unix::process::CommandExt;
use std::process::{Command, ExitStatus, Stdio};

use camino::Utf8PathBuf;
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use nix::sys::socket::{AddressFamily, SockFlag, SockType, socketpair};
use tracing::debug;
use which::which;

use crate::error::DebstrapError;
use crate::frontend::{Frontend, UserLevel};

/// Environment for children running inside the target chroot.
const CHROOT_ENV: [(&str, &str); 2] = [
    ("DEBIAN_FRONTEND", "noninteractive"),
    ("PATH", "/sbin:/usr/sbin:/bin:/usr/bin"),
];

/// Direction of interest for one child descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interest {
    /// The child writes, the handler reads.
    Read,
    /// The child reads, the handler writes.
    Write,
}

/// What a handler wants after servicing a readiness event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    /// Close the parent end; the child sees EOF.
    Close,
}

/// Services one child descriptor whenever it is ready.
///
/// The stream is the parent end of the socketpair; it is bidirectional,
/// so reply-channel handlers can write back on the same descriptor.
pub trait FdHandler {
    fn ready(&mut self, stream: &mut UnixStream) -> Result<Flow, DebstrapError>;
}

/// One child descriptor wiring request.
pub struct IoSpec<'a> {
    pub child_fd: RawFd,
    pub interest: Interest,
    pub handler: Option<&'a mut dyn FdHandler>,
}

impl<'a> IoSpec<'a> {
    pub fn new(child_fd: RawFd, interest: Interest, handler: &'a mut dyn FdHandler) -> Self {
        Self {
            child_fd,
            interest,
            handler: Some(handler),
        }
    }

    /// A descriptor the child may use but nobody listens to.
    pub fn null(child_fd: RawFd) -> Self {
        Self {
            child_fd,
            interest: Interest::Read,
            handler: None,
        }
    }
}

/// What to execute and where.
pub struct ExecSpec {
    pub argv: Vec<String>,
    /// Run the child with this directory as its root.
    pub chroot: Option<Utf8PathBuf>,
}

impl ExecSpec {
    pub fn new(argv: Vec<String>) -> Self {
        Self { argv, chroot: None }
    }

    pub fn chrooted(argv: Vec<String>, root: Utf8PathBuf) -> Self {
        Self {
            argv,
            chroot: Some(root),
        }
    }

    fn describe(&self) -> String {
        self.argv.join(" ")
    }
}

/// Runs the child and returns its exit status.
///
/// Spawn failures (including chroot failure in the pre-exec hook) and
/// signal exits are errors; a normal exit is returned for the caller to
/// interpret.
pub fn execute_status(spec: &ExecSpec, io: &mut [IoSpec]) -> Result<ExitStatus, DebstrapError> {
    let Some(program) = spec.argv.first() else {
        return Err(DebstrapError::execution("<empty>", "no program given"));
    };
    debug!(command = %spec.describe(), chroot = ?spec.chroot, "execute");

    let mut command = if spec.chroot.is_some() {
        // Inside the chroot the host's command lookup is meaningless;
        // the child's fixed PATH resolves the program.
        Command::new(program)
    } else {
        let resolved = which(program).map_err(|e| {
            DebstrapError::execution(spec.describe(), format!("command not found: {}", e))
        })?;
        Command::new(resolved)
    };
    command.args(&spec.argv[1..]);

    if let Some(root) = &spec.chroot {
        command.env_clear();
        command.envs(CHROOT_ENV);
        let root = root.clone();
        unsafe {
            command.pre_exec(move || {
                nix::unistd::chroot(root.as_std_path())?;
                nix::unistd::chdir("/")?;
                Ok(())
            });
        }
    }

    command.stdin(Stdio::null());
    command.stdout(Stdio::null());
    command.stderr(Stdio::null());

    // Parent ends of the socketpairs, parallel to `io`; None for
    // handler-less specs.
    let mut streams: Vec<Option<UnixStream>> = Vec::with_capacity(io.len());
    let mut child_ends: Vec<(RawFd, OwnedFd)> = Vec::new();

    for spec_entry in io.iter() {
        if spec_entry.handler.is_some() {
            let (parent, child) = socketpair(
                AddressFamily::Unix,
                SockType::Stream,
                None,
                SockFlag::SOCK_CLOEXEC,
            )
            .map_err(|e| DebstrapError::execution(spec.describe(), format!("socketpair: {}", e)))?;

            let stream = UnixStream::from(parent);
            if spec_entry.interest == Interest::Read {
                stream.set_nonblocking(true).map_err(|e| {
                    DebstrapError::execution(spec.describe(), format!("set_nonblocking: {}", e))
                })?;
            }
            streams.push(Some(stream));
            child_ends.push((spec_entry.child_fd, child));
        } else {
            let null = std::fs::OpenOptions::new()
                .read(true)
                .write(true)
                .open("/dev/null")
                .map_err(|e| DebstrapError::io("/dev/null", e))?;
            streams.push(None);
            child_ends.push((spec_entry.child_fd, OwnedFd::from(null)));
        }
    }

    // Keep the sources clear of the dup2 target range.
    for (_, fd) in &mut child_ends {
        if fd.as_raw_fd() < 10 {
            let raised =
                unsafe { nix::libc::fcntl(fd.as_raw_fd(), nix::libc::F_DUPFD_CLOEXEC, 10) };
            if raised < 0 {
                return Err(DebstrapError::execution(
                    spec.describe(),
                    format!("fcntl: {}", io::Error::last_os_error()),
                ));
            }
            *fd = unsafe { OwnedFd::from_raw_fd(raised) };
        }
    }

    let dup_plan: Vec<(RawFd, RawFd)> = child_ends
        .iter()
        .map(|(target, fd)| (fd.as_raw_fd(), *target))
        .collect();
    unsafe {
        command.pre_exec(move || {
            for &(src, dst) in &dup_plan {
                if nix::libc::dup2(src, dst) < 0 {
                    return Err(io::Error::last_os_error());
                }
            }
            Ok(())
        });
    }

    let mut child = command.spawn().map_err(|e| {
        DebstrapError::execution(spec.describe(), format!("failed to spawn: {}", e))
    })?;
    debug!(pid = child.id(), "spawned");

    // The child holds its own copies now.
    drop(child_ends);

    let io_result = run_io_loop(spec, io, &mut streams);
    drop(streams);

    let status = child.wait().map_err(|e| {
        DebstrapError::execution(spec.describe(), format!("failed to wait: {}", e))
    })?;
    io_result?;

    debug!(command = %spec.describe(), %status, "child finished");
    if status.code().is_none() {
        // Killed by a signal.
        return Err(DebstrapError::execution(spec.describe(), status.to_string()));
    }
    Ok(status)
}

/// Runs the child and errors on any unsuccessful exit.
pub fn execute(spec: &ExecSpec, io: &mut [IoSpec]) -> Result<(), DebstrapError> {
    let status = execute_status(spec, io)?;
    if !status.success() {
        return Err(DebstrapError::execution(spec.describe(), status.to_string()));
    }
    Ok(())
}

fn run_io_loop(
    spec: &ExecSpec,
    io: &mut [IoSpec],
    streams: &mut [Option<UnixStream>],
) -> Result<(), DebstrapError> {
    loop {
        let mut indices = Vec::new();
        let revents: Vec<PollFlags> = {
            let mut pollfds = Vec::new();
            for (i, stream) in streams.iter().enumerate() {
                let Some(stream) = stream else { continue };
                if io[i].handler.is_none() {
                    continue;
                }
                let interest = match io[i].interest {
                    Interest::Read => PollFlags::POLLIN,
                    Interest::Write => PollFlags::POLLOUT,
                };
                pollfds.push(PollFd::new(stream.as_fd(), interest));
                indices.push(i);
            }
            if pollfds.is_empty() {
                return Ok(());
            }

            poll(&mut pollfds, PollTimeout::NONE).map_err(|e| {
                DebstrapError::execution(spec.describe(), format!("poll: {}", e))
            })?;
            pollfds
                .iter()
                .map(|p| p.revents().unwrap_or(PollFlags::empty()))
                .collect()
        };

        // Handlers fire in IoSpec declaration order within one tick, and
        // before the hang-up check so the final burst of data is drained.
        for (k, &i) in indices.iter().enumerate() {
            if !revents[k].intersects(PollFlags::POLLIN | PollFlags::POLLOUT) {
                continue;
            }
            let stream = streams[i].as_mut().expect("polled stream present");
            let handler = io[i].handler.as_mut().expect("polled handler present");
            match handler.ready(stream)? {
                Flow::Continue => {}
                Flow::Close => streams[i] = None,
            }
        }

        let hangup = PollFlags::POLLHUP | PollFlags::POLLERR | PollFlags::POLLNVAL;
        if revents.iter().any(|r| r.intersects(hangup)) {
            return Ok(());
        }
    }
}

/// Accumulates non-blocking reads and yields complete lines.
///
/// At EOF a trailing partial line is still delivered.
#[derive(Default)]
pub struct LineBuffer {
    buf: Vec<u8>,
}

impl LineBuffer {
    /// Drains everything currently readable, invoking `f` per line.
    pub fn read_lines(
        &mut self,
        stream: &mut UnixStream,
        mut f: impl FnMut(&str),
    ) -> io::Result<Flow> {
        let mut chunk = [0u8; 4096];
        loop {
            match stream.read(&mut chunk) {
                Ok(0) => {
                    if !self.buf.is_empty() {
                        f(&String::from_utf8_lossy(&self.buf));
                        self.buf.clear();
                    }
                    return Ok(Flow::Close);
                }
                Ok(n) => {
                    self.buf.extend_from_slice(&chunk[..n]);
                    while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
                        let line: Vec<u8> = self.buf.drain(..=pos).collect();
                        f(String::from_utf8_lossy(&line[..line.len() - 1]).trim_end_matches('\r'));
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(Flow::Continue),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }
}

/// Forwards child output lines to the frontend at a fixed level.
pub struct LogHandler<'a> {
    frontend: &'a Frontend,
    level: UserLevel,
    lines: LineBuffer,
}

impl<'a> LogHandler<'a> {
    pub fn new(frontend: &'a Frontend, level: UserLevel) -> Self {
        Self {
            frontend,
            level,
            lines: LineBuffer::default(),
        }
    }
}

impl FdHandler for LogHandler<'_> {
    fn ready(&mut self, stream: &mut UnixStream) -> Result<Flow, DebstrapError> {
        let frontend = self.frontend;
        let level = self.level;
        self.lines
            .read_lines(stream, |line| frontend.message(level, line))
            .map_err(|e| DebstrapError::io("subprocess output", e))
    }
}

/// The standard stdout/stderr log pair used by most invocations.
pub fn log_handlers(frontend: &Frontend) -> (LogHandler<'_>, LogHandler<'_>) {
    (
        LogHandler::new(frontend, UserLevel::Output),
        LogHandler::new(frontend, UserLevel::OutputStderr),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::{Arc, Mutex};

    /// Collects every line a child writes on one descriptor.
    struct CollectHandler {
        lines: Arc<Mutex<Vec<String>>>,
        buffer: LineBuffer,
    }

    impl CollectHandler {
        fn new(lines: Arc<Mutex<Vec<String>>>) -> Self {
            Self {
                lines,
                buffer: LineBuffer::default(),
            }
        }
    }

    impl FdHandler for CollectHandler {
        fn ready(&mut self, stream: &mut UnixStream) -> Result<Flow, DebstrapError> {
            let lines = self.lines.clone();
            self.buffer
                .read_lines(stream, |line| lines.lock().unwrap().push(line.to_string()))
                .map_err(|e| DebstrapError::io("collect", e))
        }
    }

    /// Writes fixed bytes into the child's stdin, then closes it.
    struct FeedHandler {
        data: Vec<u8>,
    }

    impl FdHandler for FeedHandler {
        fn ready(&mut self, stream: &mut UnixStream) -> Result<Flow, DebstrapError> {
            if self.data.is_empty() {
                return Ok(Flow::Close);
            }
            stream
                .write_all(&self.data)
                .map_err(|e| DebstrapError::io("feed", e))?;
            self.data.clear();
            Ok(Flow::Close)
        }
    }

    #[test]
    fn test_execute_collects_stdout_lines() {
        let lines = Arc::new(Mutex::new(Vec::new()));
        let mut handler = CollectHandler::new(lines.clone());
        let spec = ExecSpec::new(vec![
            "sh".to_string(),
            "-c".to_string(),
            "printf 'one\\ntwo\\n'".to_string(),
        ]);
        let mut io = [IoSpec::new(1, Interest::Read, &mut handler)];
        execute(&spec, &mut io).unwrap();
        assert_eq!(*lines.lock().unwrap(), vec!["one", "two"]);
    }

    #[test]
    fn test_execute_custom_child_fd() {
        let lines = Arc::new(Mutex::new(Vec::new()));
        let mut handler = CollectHandler::new(lines.clone());
        let spec = ExecSpec::new(vec![
            "sh".to_string(),
            "-c".to_string(),
            "echo status >&3".to_string(),
        ]);
        let mut io = [IoSpec::new(3, Interest::Read, &mut handler)];
        execute(&spec, &mut io).unwrap();
        assert_eq!(*lines.lock().unwrap(), vec!["status"]);
    }

    #[test]
    fn test_execute_stdin_feeder_roundtrip() {
        let lines = Arc::new(Mutex::new(Vec::new()));
        let mut collect = CollectHandler::new(lines.clone());
        let mut feed = FeedHandler {
            data: b"fed line\n".to_vec(),
        };
        let spec = ExecSpec::new(vec!["cat".to_string()]);
        let mut io = [
            IoSpec::new(0, Interest::Write, &mut feed),
            IoSpec::new(1, Interest::Read, &mut collect),
        ];
        execute(&spec, &mut io).unwrap();
        assert_eq!(*lines.lock().unwrap(), vec!["fed line"]);
    }

    #[test]
    fn test_execute_nonzero_exit_is_error() {
        let spec = ExecSpec::new(vec!["false".to_string()]);
        let err = execute(&spec, &mut []).unwrap_err();
        assert!(matches!(err, DebstrapError::Execution { .. }));
    }

    #[test]
    fn test_execute_status_returns_nonzero_exit() {
        let spec = ExecSpec::new(vec![
            "sh".to_string(),
            "-c".to_string(),
            "exit 3".to_string(),
        ]);
        let status = execute_status(&spec, &mut []).unwrap();
        assert_eq!(status.code(), Some(3));
    }

    #[test]
    fn test_execute_missing_command_is_error() {
        let spec = ExecSpec::new(vec!["this-command-does-not-exist".to_string()]);
        assert!(execute(&spec, &mut []).is_err());
    }

    #[test]
    fn test_line_buffer_partial_lines() {
        let (mut a, mut b) = UnixStream::pair().unwrap();
        b.set_nonblocking(true).unwrap();
        let mut buffer = LineBuffer::default();
        let mut seen = Vec::new();

        a.write_all(b"par").unwrap();
        let flow = buffer
            .read_lines(&mut b, |l| seen.push(l.to_string()))
            .unwrap();
        assert_eq!(flow, Flow::Continue);
        assert!(seen.is_empty());

        a.write_all(b"tial\nrest").unwrap();
        buffer
            .read_lines(&mut b, |l| seen.push(l.to_string()))
            .unwrap();
        assert_eq!(seen, vec!["partial"]);

        drop(a);
        let flow = buffer
            .read_lines(&mut b, |l| seen.push(l.to_string()))
            .unwrap();
        assert_eq!(flow, Flow::Close);
        assert_eq!(seen, vec!["partial", "rest"]);
    }
}
