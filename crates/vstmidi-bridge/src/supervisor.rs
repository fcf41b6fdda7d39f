//! Worker process supervision.
//!
//! A [`WorkerSession`] owns the channel to one worker and, when the worker is a
//! child process, the process handle. Teardown always drops the channel before
//! the process, and runs on every path: explicit [`WorkerSession::terminate`],
//! any transport or command failure, and `Drop`.

use crate::arch::resolve_worker;
use crate::channel::DuplexChannel;
use crate::config::BridgeConfig;
use crate::metadata::PluginInfo;
use crate::protocol::{format_checksum, plugin_checksum, Command, Handshake, WorkerStatus};
use crate::{BridgeError, Result};
use crossbeam_channel::RecvTimeoutError;
use std::io::{self, Read, Write};
use std::path::Path;
use std::process::{Child, Command as ProcessCommand, Stdio};
use std::thread;
use std::time::{Duration, Instant};

pub type WorkerReader = Box<dyn Read + Send>;
pub type WorkerWriter = Box<dyn Write + Send>;
pub(crate) type HostChannel = DuplexChannel<WorkerReader, WorkerWriter>;

/// Poll interval while waiting for a killed worker to exit.
const EXIT_POLL: Duration = Duration::from_millis(5);

pub struct WorkerSession {
    pub(crate) channel: Option<HostChannel>,
    process: Option<Child>,
    info: PluginInfo,
    terminate_timeout: Duration,
    terminated: bool,
    /// Reused byte buffer for PCM reads.
    pub(crate) pcm_bytes: Vec<u8>,
}

impl WorkerSession {
    /// Launches the worker matching `plugin_path` and waits for its handshake.
    pub fn spawn(config: &BridgeConfig, plugin_path: &Path) -> Result<Self> {
        let worker = resolve_worker(&config.resolve_worker_dir()?, plugin_path)?;
        Self::spawn_worker(&worker, plugin_path, config)
    }

    /// Launches a specific worker binary.
    pub fn spawn_worker(worker: &Path, plugin_path: &Path, config: &BridgeConfig) -> Result<Self> {
        let plugin_arg = plugin_path.to_string_lossy();
        let checksum = format_checksum(plugin_checksum(&plugin_arg));

        let mut child = ProcessCommand::new(worker)
            .arg(plugin_arg.as_ref())
            .arg(&checksum)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| match e.kind() {
                io::ErrorKind::NotFound => BridgeError::WorkerNotFound(worker.to_path_buf()),
                _ => BridgeError::Spawn(e),
            })?;

        tracing::info!(
            "spawned {} (pid {}) for {}",
            worker.display(),
            child.id(),
            plugin_path.display()
        );

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(BridgeError::Spawn(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "worker pipes unavailable",
            )));
        };

        let session = Self {
            channel: None,
            process: Some(child),
            info: PluginInfo::default(),
            terminate_timeout: config.terminate_timeout(),
            terminated: false,
            pcm_bytes: Vec::new(),
        };
        session.handshake(Box::new(stdout), Box::new(stdin), config.connect_timeout())
    }

    /// Attaches to a worker reachable through arbitrary streams, such as a
    /// worker running on a thread of this process.
    ///
    /// There is no process to kill here. If the handshake times out, the
    /// writer is dropped at once but the helper thread keeps blocking on
    /// `reader` until it reports end of stream or an error. Whoever owns the
    /// other end of `reader` must close it to let the helper exit.
    pub fn connect(reader: WorkerReader, writer: WorkerWriter, config: &BridgeConfig) -> Result<Self> {
        let session = Self {
            channel: None,
            process: None,
            info: PluginInfo::default(),
            terminate_timeout: config.terminate_timeout(),
            terminated: false,
            pcm_bytes: Vec::new(),
        };
        session.handshake(reader, writer, config.connect_timeout())
    }

    /// Reads the handshake on a helper thread so a silent worker cannot stall
    /// the caller past `timeout`. On timeout a spawned worker is killed,
    /// which ends the helper's read; a connected one only stops it once its
    /// reader closes.
    fn handshake(mut self, reader: WorkerReader, writer: WorkerWriter, timeout: Duration) -> Result<Self> {
        let (tx, rx) = crossbeam_channel::bounded(1);
        let helper = thread::Builder::new()
            .name("vstmidi-handshake".into())
            .spawn(move || {
                let mut channel = DuplexChannel::host(reader, io::sink());
                let handshake = Handshake::read(&mut channel);
                let (reader, _) = channel.into_parts();
                let _ = tx.send((reader, handshake));
            });

        if let Err(e) = helper {
            self.terminate();
            return Err(BridgeError::Spawn(e));
        }

        let (reader, handshake) = match rx.recv_timeout(timeout) {
            Ok(received) => received,
            Err(RecvTimeoutError::Timeout) => {
                tracing::warn!("worker handshake timed out after {:?}", timeout);
                self.terminate();
                return Err(BridgeError::HandshakeTimeout(timeout));
            }
            Err(RecvTimeoutError::Disconnected) => {
                self.terminate();
                return Err(BridgeError::ConnectionLost);
            }
        };

        match handshake {
            Handshake::Accepted(info) => {
                tracing::info!(
                    "worker ready: {} by {} ({} outputs)",
                    info.name,
                    info.vendor,
                    info.outputs
                );
                self.info = info;
                self.channel = Some(DuplexChannel::host(reader, writer));
                Ok(self)
            }
            Handshake::Rejected(code) => {
                let status = WorkerStatus::from_code(code);
                tracing::warn!("worker rejected plugin: {}", status);
                self.terminate();
                Err(BridgeError::Startup(status))
            }
            Handshake::Broken => {
                let exit = self.exit_status();
                self.terminate();
                match exit {
                    Some(status) => Err(BridgeError::Startup(status)),
                    None => Err(BridgeError::ConnectionLost),
                }
            }
        }
    }

    /// Nonzero exit code of a worker that already quit.
    fn exit_status(&mut self) -> Option<WorkerStatus> {
        let process = self.process.as_mut()?;
        let deadline = Instant::now() + Duration::from_millis(200);
        loop {
            match process.try_wait() {
                Ok(Some(status)) => {
                    return status
                        .code()
                        .filter(|&code| code > 0)
                        .map(|code| WorkerStatus::from_code(code as u32));
                }
                Ok(None) if Instant::now() < deadline => thread::sleep(EXIT_POLL),
                _ => return None,
            }
        }
    }

    pub fn info(&self) -> &PluginInfo {
        &self.info
    }

    pub fn output_channels(&self) -> usize {
        self.info.outputs as usize
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// True while the transport is up and, for a child process, a zero-timeout
    /// wait reports it still running.
    pub fn is_running(&mut self) -> bool {
        if self.terminated {
            return false;
        }
        let channel_up = self.channel.as_ref().is_some_and(|c| !c.is_broken());
        match self.process.as_mut() {
            Some(process) => channel_up && matches!(process.try_wait(), Ok(None)),
            None => channel_up,
        }
    }

    /// Tears the session down. Safe to call repeatedly and from any partially
    /// initialized state.
    pub fn terminate(&mut self) {
        if self.terminated {
            return;
        }
        self.terminated = true;

        if let Some(mut channel) = self.channel.take() {
            channel.send_u32(Command::Exit.code());
            drop(channel);
        }

        if let Some(mut process) = self.process.take() {
            let _ = process.kill();
            let deadline = Instant::now() + self.terminate_timeout;
            loop {
                match process.try_wait() {
                    Ok(Some(_)) => break,
                    Ok(None) if Instant::now() < deadline => thread::sleep(EXIT_POLL),
                    Ok(None) => {
                        tracing::warn!("worker {} did not exit in time", process.id());
                        break;
                    }
                    Err(e) => {
                        tracing::warn!("waiting for worker failed: {}", e);
                        break;
                    }
                }
            }
        }

        tracing::info!("worker session for {} terminated", self.info.name);
    }
}

impl Drop for WorkerSession {
    fn drop(&mut self) {
        self.terminate();
    }
}
