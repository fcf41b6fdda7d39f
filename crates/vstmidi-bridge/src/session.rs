//! Command set spoken over a [`WorkerSession`].
//!
//! Every method sends one command and reads its reply before returning. Any
//! broken transport or nonzero status terminates the session; the caller has
//! to open a new one.

use crate::protocol::{
    pack_short_message, pack_sysex_header, Command, MAX_BLOCK_FRAMES, MAX_CHUNK_LEN,
    MAX_SYSEX_LEN, STATUS_OK,
};
use crate::supervisor::WorkerSession;
use crate::{BridgeError, Result};
use byteorder::{ByteOrder, LittleEndian};

impl WorkerSession {
    fn lost(&mut self) -> BridgeError {
        self.terminate();
        BridgeError::ConnectionLost
    }

    fn send_word(&mut self, value: u32) -> Result<()> {
        if !self.is_running() {
            return Err(self.lost());
        }
        let sent = self
            .channel
            .as_mut()
            .is_some_and(|channel| channel.send_u32(value));
        if sent {
            Ok(())
        } else {
            Err(self.lost())
        }
    }

    fn send_payload(&mut self, data: &[u8]) -> Result<()> {
        let sent = self
            .channel
            .as_mut()
            .is_some_and(|channel| channel.send_bytes(data));
        if sent {
            Ok(())
        } else {
            Err(self.lost())
        }
    }

    fn receive_word(&mut self) -> Result<u32> {
        if !self.is_running() {
            return Err(self.lost());
        }
        let Some(channel) = self.channel.as_mut() else {
            return Err(self.lost());
        };
        let value = channel.receive_u32();
        if channel.is_broken() {
            return Err(self.lost());
        }
        Ok(value)
    }

    fn send_command(&mut self, command: Command) -> Result<()> {
        tracing::trace!("-> {}", command);
        self.send_word(command.code())
    }

    fn expect_ok(&mut self, command: Command) -> Result<()> {
        let status = self.receive_word()?;
        if status != STATUS_OK {
            tracing::warn!("worker answered '{}' with status {:#x}", command, status);
            self.terminate();
            return Err(BridgeError::CommandFailed { command, status });
        }
        Ok(())
    }

    pub fn set_sample_rate(&mut self, rate: u32) -> Result<()> {
        self.send_command(Command::SetSampleRate)?;
        self.send_word(4)?;
        self.send_word(rate)?;
        self.expect_ok(Command::SetSampleRate)
    }

    /// Current persisted-state blob of the plugin.
    pub fn get_chunk(&mut self) -> Result<Vec<u8>> {
        self.send_command(Command::GetChunkData)?;
        self.expect_ok(Command::GetChunkData)?;

        let size = self.receive_word()?;
        if size > MAX_CHUNK_LEN {
            tracing::warn!("worker announced a {} byte chunk", size);
            return Err(self.lost());
        }

        let Some(channel) = self.channel.as_mut() else {
            return Err(self.lost());
        };
        let data = channel.receive_vec(size as usize);
        if channel.is_broken() {
            return Err(self.lost());
        }
        Ok(data)
    }

    pub fn set_chunk(&mut self, data: &[u8]) -> Result<()> {
        self.send_command(Command::SetChunkData)?;
        self.send_word(data.len() as u32)?;
        self.send_payload(data)?;
        self.expect_ok(Command::SetChunkData)
    }

    pub fn has_editor(&mut self) -> Result<bool> {
        self.send_command(Command::HasEditor)?;
        self.expect_ok(Command::HasEditor)?;
        Ok(self.receive_word()? != 0)
    }

    pub fn display_editor(&mut self) -> Result<()> {
        self.send_command(Command::DisplayEditorModal)?;
        self.expect_ok(Command::DisplayEditorModal)
    }

    /// Re-instantiates the plugin inside the worker.
    pub fn reset(&mut self) -> Result<()> {
        self.send_command(Command::Reset)?;
        self.expect_ok(Command::Reset)
    }

    pub fn send_midi(&mut self, port: u32, message: u32) -> Result<()> {
        self.send_command(Command::SendMidiEvent)?;
        self.send_word(pack_short_message(port, message))?;
        self.expect_ok(Command::SendMidiEvent)
    }

    /// Forwards one sysex message. A payload longer than the header can
    /// describe is refused before anything is written; the session stays up.
    pub fn send_sysex(&mut self, port: u32, data: &[u8]) -> Result<()> {
        if data.len() > MAX_SYSEX_LEN {
            return Err(BridgeError::SysExTooLong(data.len()));
        }
        self.send_command(Command::SendMidiSysexEvent)?;
        self.send_word(pack_sysex_header(port, data.len()))?;
        self.send_payload(data)?;
        self.expect_ok(Command::SendMidiSysexEvent)
    }

    /// Renders `out.len() / output_channels()` frames of interleaved float PCM
    /// in the plugin's own channel layout. On failure `out` is silenced.
    ///
    /// A plugin without outputs is still rendered, one frame per element of
    /// `out`, so it consumes its staged events; `out` comes back silent.
    pub fn render_float(&mut self, out: &mut [f32]) -> Result<()> {
        let channels = self.output_channels();
        let stride = channels.max(1);
        if out.len() < stride {
            out.fill(0.0);
            return Ok(());
        }
        let frames = out.len() / stride;
        out[frames * channels..].fill(0.0);

        let result = self.render_frames(&mut out[..frames * channels], frames, channels);
        if result.is_err() || channels == 0 {
            out.fill(0.0);
        }
        result
    }

    fn render_frames(&mut self, out: &mut [f32], frames: usize, channels: usize) -> Result<()> {
        self.send_command(Command::RenderAudioSamples)?;
        self.send_word(frames as u32)?;
        self.expect_ok(Command::RenderAudioSamples)?;
        if channels == 0 {
            return Ok(());
        }

        let mut bytes = std::mem::take(&mut self.pcm_bytes);
        let mut result = Ok(());
        for block in out.chunks_mut(MAX_BLOCK_FRAMES * channels) {
            bytes.resize(block.len() * 4, 0);
            let complete = self
                .channel
                .as_mut()
                .is_some_and(|channel| channel.receive_into(&mut bytes));
            if !complete {
                result = Err(self.lost());
                break;
            }
            LittleEndian::read_f32_into(&bytes, block);
        }
        self.pcm_bytes = bytes;
        result
    }
}

#[cfg(test)]
mod tests {
    use crate::channel::DuplexChannel;
    use crate::config::BridgeConfig;
    use crate::metadata::PluginInfo;
    use crate::protocol::Handshake;
    use crate::supervisor::WorkerSession;
    use crate::BridgeError;
    use std::io::{self, Cursor};
    use std::sync::{Arc, Mutex};

    /// Captures what the bridge writes.
    #[derive(Clone, Default)]
    struct Capture(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Capture {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn words(values: &[u32]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    /// A session whose worker replies are scripted in advance.
    fn scripted(outputs: u32, replies: Vec<u8>) -> (WorkerSession, Capture) {
        let mut worker = DuplexChannel::worker(io::empty(), Vec::new());
        assert!(Handshake::write_accepted(
            &mut worker,
            &PluginInfo::new("Scripted").outputs(outputs)
        ));
        let mut wire = worker.into_parts().1;
        wire.extend_from_slice(&replies);

        let capture = Capture::default();
        let session = WorkerSession::connect(
            Box::new(Cursor::new(wire)),
            Box::new(capture.clone()),
            &BridgeConfig::default(),
        )
        .unwrap();
        (session, capture)
    }

    #[test]
    fn test_set_sample_rate_wire_format() {
        let (mut session, capture) = scripted(2, words(&[0]));
        session.set_sample_rate(48000).unwrap();
        assert_eq!(*capture.0.lock().unwrap(), words(&[5, 4, 48000]));
    }

    #[test]
    fn test_sysex_wire_format() {
        let (mut session, capture) = scripted(2, words(&[0]));
        session.send_sysex(5, &[0xF0, 0x43, 0xF7]).unwrap();

        let mut expected = words(&[8, (2 << 24) | 3]);
        expected.extend_from_slice(&[0xF0, 0x43, 0xF7]);
        assert_eq!(*capture.0.lock().unwrap(), expected);
    }

    #[test]
    fn test_nonzero_status_terminates() {
        let (mut session, _capture) = scripted(2, words(&[11]));
        let err = session.send_midi(0, 0x007F_3C90).unwrap_err();
        assert!(matches!(err, BridgeError::CommandFailed { status: 11, .. }));
        assert!(session.is_terminated());

        let err = session.reset().unwrap_err();
        assert!(matches!(err, BridgeError::ConnectionLost));
    }

    #[test]
    fn test_get_chunk_reads_payload() {
        let mut replies = words(&[0, 4]);
        replies.extend_from_slice(&[9, 8, 7, 6]);
        let (mut session, _capture) = scripted(2, replies);
        assert_eq!(session.get_chunk().unwrap(), vec![9, 8, 7, 6]);
    }

    #[test]
    fn test_render_reads_interleaved_floats() {
        let mut replies = words(&[0]);
        for sample in [0.5f32, -0.5, 0.25, -0.25] {
            replies.extend_from_slice(&sample.to_le_bytes());
        }
        let (mut session, capture) = scripted(2, replies);

        let mut out = [0.0f32; 4];
        session.render_float(&mut out).unwrap();
        assert_eq!(out, [0.5, -0.5, 0.25, -0.25]);
        assert_eq!(*capture.0.lock().unwrap(), words(&[9, 2]));
    }

    #[test]
    fn test_truncated_render_silences_and_tears_down() {
        let mut replies = words(&[0]);
        replies.extend_from_slice(&0.5f32.to_le_bytes());
        let (mut session, _capture) = scripted(2, replies);

        let mut out = [1.0f32; 8];
        assert!(session.render_float(&mut out).is_err());
        assert_eq!(out, [0.0; 8], "poisoned PCM must not reach the caller");
        assert!(session.is_terminated());
    }

    #[test]
    fn test_render_without_outputs_still_runs_worker() {
        let (mut session, capture) = scripted(0, words(&[0]));

        let mut out = [1.0f32; 64];
        session.render_float(&mut out).unwrap();
        assert_eq!(out, [0.0; 64], "a plugin without outputs renders silence");
        assert_eq!(
            *capture.0.lock().unwrap(),
            words(&[9, 64]),
            "the render request must still reach the worker"
        );
        assert!(!session.is_terminated());
    }

    #[test]
    fn test_oversized_sysex_refused_without_writing() {
        use crate::protocol::MAX_SYSEX_LEN;

        let (mut session, capture) = scripted(2, words(&[0]));
        let data = vec![0u8; MAX_SYSEX_LEN + 1];
        let err = session.send_sysex(0, &data).unwrap_err();
        assert!(matches!(err, BridgeError::SysExTooLong(len) if len == MAX_SYSEX_LEN + 1));
        assert!(capture.0.lock().unwrap().is_empty(), "nothing may hit the wire");
        assert!(!session.is_terminated());

        session.send_midi(0, 0x007F_3C90).unwrap();
    }
}
