//! Worker command loop.
//!
//! Reads one command word at a time from the bridge and answers it before
//! reading the next. Exit, or end of input (which reads as Exit), ends the
//! loop; any failure ends it with the status the worker exits with.

use crate::error::{HostError, Result};
use crate::instrument::InstrumentLoader;
use crate::runtime::PluginRuntime;
use byteorder::{ByteOrder, LittleEndian};
use std::io::{Read, Write};
use vstmidi_bridge::protocol::{unpack_sysex_header, Handshake, MAX_CHUNK_LEN, STATUS_OK};
use vstmidi_bridge::{Command, DuplexChannel, WorkerStatus};

pub struct HostServer<R, W> {
    channel: DuplexChannel<R, W>,
    runtime: PluginRuntime,
    /// Reused byte buffer for outgoing PCM.
    pcm: Vec<u8>,
}

impl<R: Read, W: Write> HostServer<R, W> {
    pub fn new(channel: DuplexChannel<R, W>, runtime: PluginRuntime) -> Self {
        Self {
            channel,
            runtime,
            pcm: Vec::new(),
        }
    }

    /// Writes the startup handshake for the loaded plugin.
    pub fn announce(&mut self) -> bool {
        Handshake::write_accepted(&mut self.channel, self.runtime.info())
    }

    pub fn runtime(&self) -> &PluginRuntime {
        &self.runtime
    }

    pub fn run(&mut self) -> Result<()> {
        loop {
            let code = self.channel.receive_u32();
            let command = Command::from_code(code).ok_or_else(|| {
                HostError::new(WorkerStatus::UnknownCommand, format!("command {code:#x}"))
            })?;
            if command == Command::Exit {
                tracing::debug!("exit requested");
                return Ok(());
            }
            tracing::debug!("<- {}", command);
            self.dispatch(command)?;
        }
    }

    fn send_status(&mut self) {
        self.channel.send_u32(STATUS_OK);
    }

    fn dispatch(&mut self, command: Command) -> Result<()> {
        match command {
            Command::Exit => {}

            Command::GetChunkData => {
                let chunk = self.runtime.get_chunk()?;
                self.send_status();
                self.channel.send_u32(chunk.len() as u32);
                self.channel.send_bytes(&chunk);
            }

            Command::SetChunkData => {
                let size = self.channel.receive_u32();
                if size > MAX_CHUNK_LEN {
                    return Err(HostError::new(
                        WorkerStatus::InvalidArguments,
                        format!("chunk of {size} bytes"),
                    ));
                }
                let chunk = self.channel.receive_vec(size as usize);
                self.runtime.set_chunk(chunk)?;
                self.send_status();
            }

            Command::HasEditor => {
                let has_editor = self.runtime.has_editor();
                self.send_status();
                self.channel.send_u32(u32::from(has_editor));
            }

            Command::DisplayEditorModal => {
                self.runtime.display_editor()?;
                self.send_status();
            }

            Command::SetSampleRate => {
                let size = self.channel.receive_u32();
                if size != 4 {
                    return Err(HostError::new(
                        WorkerStatus::CannotSetSampleRate,
                        format!("rate payload of {size} bytes"),
                    ));
                }
                let rate = self.channel.receive_u32();
                self.runtime.set_sample_rate(rate)?;
                self.send_status();
            }

            Command::Reset => {
                self.runtime.reset()?;
                self.send_status();
            }

            Command::SendMidiEvent => {
                let word = self.channel.receive_u32();
                self.runtime.queue_midi(word);
                self.send_status();
            }

            Command::SendMidiSysexEvent => {
                let (port, len) = unpack_sysex_header(self.channel.receive_u32());
                let data = self.channel.receive_vec(len);
                self.runtime.queue_sysex(port, data);
                self.send_status();
            }

            Command::RenderAudioSamples => {
                self.runtime.begin_render()?;
                let frames = self.channel.receive_u32() as usize;
                self.send_status();

                let channel = &mut self.channel;
                let pcm = &mut self.pcm;
                let complete = self.runtime.render(frames, |block| {
                    pcm.resize(block.len() * 4, 0);
                    LittleEndian::write_f32_into(block, pcm);
                    channel.send_bytes(pcm)
                });
                if !complete {
                    tracing::warn!("render of {} frames interrupted", frames);
                }
            }
        }
        Ok(())
    }

    pub fn into_parts(self) -> (DuplexChannel<R, W>, PluginRuntime) {
        (self.channel, self.runtime)
    }
}

/// Runs a whole worker session over `reader`/`writer` and returns the exit
/// code: instantiate, handshake, serve commands, close the plugin, then send
/// the final status word.
pub fn serve<R: Read, W: Write>(reader: R, writer: W, loader: Box<dyn InstrumentLoader>) -> u32 {
    let mut channel = DuplexChannel::worker(reader, writer);

    let runtime = match PluginRuntime::new(loader) {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!("plugin rejected: {}", e);
            channel.send_u32(e.code());
            return e.code();
        }
    };

    let mut server = HostServer::new(channel, runtime);
    if !server.announce() {
        tracing::warn!("could not write handshake");
    }

    let code = match server.run() {
        Ok(()) => STATUS_OK,
        Err(e) => {
            tracing::error!("worker stopping: {}", e);
            e.code()
        }
    };

    let (mut channel, runtime) = server.into_parts();
    drop(runtime);
    channel.send_u32(code);
    code
}
