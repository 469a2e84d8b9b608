//!
//! Length-framed wire protocol: inbound frame classification (little-endian
//! multi-byte fields) and outbound command encoding (big-endian). The
//! byte-order asymmetry is the wire contract, not a bug — see spec §4.1.
//!

pub mod error;

use std::time::{Duration, Instant};

use byteorder::{BigEndian, ByteOrder, LittleEndian};

use crate::config::{CommandCodes, MessageIds};
use error::FrameError;

/// Rotation sense carried in the `dir` byte of every motion command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Reverse,
}

impl Direction {
    pub fn as_u8(self) -> u8 {
        match self {
            Direction::Forward => 1,
            Direction::Reverse => 0,
        }
    }

    pub fn from_u8(value: u8) -> Direction {
        if value != 0 { Direction::Forward } else { Direction::Reverse }
    }
}

///
/// A decoded inbound frame, classified by message id. Multi-byte fields are
/// little-endian, per the wire contract.
///
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    Status { status_byte: u8, job_id: u8, microstep: u8, pulses_remaining: u32 },
    Feedback { velocity_rad_per_s: f32, angle_rad: f32, encoder_count: i16 },
    Fault,
    Response { command_code: u8, job_id: u8, response_code: u8, ack: bool },
    JobComplete { job_id: u8 },
    JobCancelled { job_id: u8 },
}

impl InboundFrame {
    ///
    /// Classifies and decodes an already-framed payload: the bytes from the
    /// message id through the trailing ETX, inclusive.
    ///
    /// # Parameters:
    /// - `payload`: the framed bytes, `payload[0]` is the message id, `payload.last()` must be `etx`
    /// - `ids`: the configured message-id table used to classify `payload[0]`
    /// - `ack`: the configured ACK byte, used to resolve the response's ack/nak flag
    /// - `etx`: the configured frame-end marker
    ///
    /// # Returns:
    /// - The classified frame
    /// - A `FrameError` describing why the payload could not be classified or decoded
    ///
    pub fn parse(payload: &[u8], ids: &MessageIds, ack: u8, etx: u8) -> Result<InboundFrame, FrameError> {
        if payload.len() < 2 {
            return Err(FrameError::TooShort);
        }
        let last = *payload.last().unwrap();
        if last != etx {
            return Err(FrameError::BadEtx(last));
        }

        let message_id = payload[0];

        if message_id == *ids.motor_status() {
            expect_len(message_id, 9, payload.len())?;
            return Ok(InboundFrame::Status {
                status_byte: payload[1],
                job_id: payload[2],
                microstep: payload[3],
                pulses_remaining: LittleEndian::read_u32(&payload[4..8]),
            });
        }
        if message_id == *ids.motor_feedback() {
            expect_len(message_id, 12, payload.len())?;
            return Ok(InboundFrame::Feedback {
                velocity_rad_per_s: LittleEndian::read_f32(&payload[1..5]),
                angle_rad: LittleEndian::read_f32(&payload[5..9]),
                encoder_count: LittleEndian::read_i16(&payload[9..11]),
            });
        }
        if message_id == *ids.motor_fault() {
            expect_len(message_id, 2, payload.len())?;
            return Ok(InboundFrame::Fault);
        }
        if message_id == *ids.response() {
            expect_len(message_id, 6, payload.len())?;
            return Ok(InboundFrame::Response {
                command_code: payload[1],
                job_id: payload[2],
                response_code: payload[3],
                ack: payload[4] == ack,
            });
        }
        if message_id == *ids.job_complete() {
            expect_len(message_id, 3, payload.len())?;
            return Ok(InboundFrame::JobComplete { job_id: payload[1] });
        }
        if message_id == *ids.job_cancelled() {
            expect_len(message_id, 3, payload.len())?;
            return Ok(InboundFrame::JobCancelled { job_id: payload[1] });
        }

        Err(FrameError::UnknownMessageId(message_id))
    }
}

fn expect_len(message_id: u8, expected: usize, got: usize) -> Result<(), FrameError> {
    if expected != got {
        return Err(FrameError::UnexpectedLength { message_id, expected, got });
    }
    Ok(())
}

///
/// A byte-at-a-time inbound frame assembler. Feed it bytes as they arrive
/// from the transport; it resynchronises on the next STX whenever a frame
/// turns out malformed, exactly as spec §4.1 describes.
///
pub struct FrameDecoder {
    stx: u8,
    state: DecoderState,
}

enum DecoderState {
    WaitStx,
    ReadLength,
    ReadPayload { expected: usize, buf: Vec<u8>, started_at: Instant },
}

impl FrameDecoder {
    pub fn new(stx: u8) -> Self {
        Self { stx, state: DecoderState::WaitStx }
    }

    ///
    /// Feeds one byte. Returns `Some(payload)` when a complete, length-valid
    /// frame has been assembled (payload = message id .. ETX, inclusive).
    /// ETX validity and message classification are left to [`InboundFrame::parse`];
    /// only framing-level malformation (`length < 3`) is handled here.
    ///
    pub fn feed(&mut self, byte: u8) -> Option<Vec<u8>> {
        match &mut self.state {
            DecoderState::WaitStx => {
                if byte == self.stx {
                    self.state = DecoderState::ReadLength;
                }
                None
            }
            DecoderState::ReadLength => {
                let length = byte as usize;
                if length < 3 {
                    self.state = DecoderState::WaitStx;
                    return None;
                }
                self.state = DecoderState::ReadPayload {
                    expected: length - 2,
                    buf: Vec::with_capacity(length - 2),
                    started_at: Instant::now(),
                };
                None
            }
            DecoderState::ReadPayload { expected, buf, .. } => {
                buf.push(byte);
                if buf.len() == *expected {
                    let payload = std::mem::take(buf);
                    self.state = DecoderState::WaitStx;
                    Some(payload)
                } else {
                    None
                }
            }
        }
    }

    ///
    /// Feeds a whole chunk, returning every complete frame payload found.
    ///
    pub fn feed_bytes(&mut self, bytes: &[u8]) -> Vec<Vec<u8>> {
        bytes.iter().filter_map(|&b| self.feed(b)).collect()
    }

    ///
    /// Drops an in-flight frame that has been waiting for its remaining bytes
    /// longer than `timeout`, resynchronising on the next STX. Returns `true`
    /// if a frame was dropped.
    ///
    pub fn check_timeout(&mut self, now: Instant, timeout: Duration) -> bool {
        if let DecoderState::ReadPayload { started_at, .. } = &self.state {
            if now.duration_since(*started_at) > timeout {
                self.state = DecoderState::WaitStx;
                return true;
            }
        }
        false
    }
}

///
/// An outbound command, ready to be encoded (big-endian) and written to the
/// wire. Each variant mirrors one spec §3 outbound frame layout.
///
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundCommand {
    Control { command_code: u8 },
    SendJob { command_code: u8, direction: Direction, microstep: u8, job_id: u8, pulses: u32 },
    SendJobWithRamping { command_code: u8, direction: Direction, microstep: u8, job_id: u8, pulses: u32, ramping_steps: u32 },
    SendJobAllVariables {
        command_code: u8,
        direction: Direction,
        microstep: u8,
        job_id: u8,
        pulses: u32,
        pulse_interval_us: u32,
        pulse_on_period: u32,
    },
    SendJobAllVariablesWithRamping {
        command_code: u8,
        direction: Direction,
        microstep: u8,
        job_id: u8,
        pulses: u32,
        pulse_interval_us: u32,
        pulse_on_period: u32,
        ramping_steps: u32,
    },
    SendJobAllVariablesWithRampingAndRate {
        command_code: u8,
        direction: Direction,
        microstep: u8,
        job_id: u8,
        pulses: u32,
        pulse_interval_us: u32,
        pulse_on_period: u32,
        ramping_steps: u32,
        ramp_scaler: u8,
    },
}

fn framed(stx: u8, etx: u8, command_code: u8, fields: &[u8]) -> Vec<u8> {
    let length = (fields.len() + 4) as u8;
    let mut frame = Vec::with_capacity(length as usize);
    frame.push(stx);
    frame.push(length);
    frame.push(command_code);
    frame.extend_from_slice(fields);
    frame.push(etx);
    frame
}

impl OutboundCommand {
    ///
    /// Encodes this command into a complete, length-prefixed frame.
    ///
    pub fn encode(&self, stx: u8, etx: u8) -> Vec<u8> {
        match self {
            OutboundCommand::Control { command_code } => framed(stx, etx, *command_code, &[]),
            OutboundCommand::SendJob { command_code, direction, microstep, job_id, pulses } => {
                let mut fields = vec![direction.as_u8(), *microstep, *job_id];
                let mut pulse_bytes = [0u8; 4];
                BigEndian::write_u32(&mut pulse_bytes, *pulses);
                fields.extend_from_slice(&pulse_bytes);
                framed(stx, etx, *command_code, &fields)
            }
            OutboundCommand::SendJobWithRamping { command_code, direction, microstep, job_id, pulses, ramping_steps } => {
                let mut fields = vec![direction.as_u8(), *microstep, *job_id];
                append_u32_be(&mut fields, *pulses);
                append_u32_be(&mut fields, *ramping_steps);
                framed(stx, etx, *command_code, &fields)
            }
            OutboundCommand::SendJobAllVariables {
                command_code,
                direction,
                microstep,
                job_id,
                pulses,
                pulse_interval_us,
                pulse_on_period,
            } => {
                let mut fields = vec![direction.as_u8(), *microstep, *job_id];
                append_u32_be(&mut fields, *pulses);
                append_u32_be(&mut fields, *pulse_interval_us);
                append_u32_be(&mut fields, *pulse_on_period);
                framed(stx, etx, *command_code, &fields)
            }
            OutboundCommand::SendJobAllVariablesWithRamping {
                command_code,
                direction,
                microstep,
                job_id,
                pulses,
                pulse_interval_us,
                pulse_on_period,
                ramping_steps,
            } => {
                let mut fields = vec![direction.as_u8(), *microstep, *job_id];
                append_u32_be(&mut fields, *pulses);
                append_u32_be(&mut fields, *pulse_interval_us);
                append_u32_be(&mut fields, *pulse_on_period);
                append_u32_be(&mut fields, *ramping_steps);
                framed(stx, etx, *command_code, &fields)
            }
            OutboundCommand::SendJobAllVariablesWithRampingAndRate {
                command_code,
                direction,
                microstep,
                job_id,
                pulses,
                pulse_interval_us,
                pulse_on_period,
                ramping_steps,
                ramp_scaler,
            } => {
                let mut fields = vec![direction.as_u8(), *microstep, *job_id];
                append_u32_be(&mut fields, *pulses);
                append_u32_be(&mut fields, *pulse_interval_us);
                append_u32_be(&mut fields, *pulse_on_period);
                append_u32_be(&mut fields, *ramping_steps);
                fields.push(*ramp_scaler);
                framed(stx, etx, *command_code, &fields)
            }
        }
    }

    ///
    /// Decodes a previously-encoded command frame back into its typed form,
    /// for round-trip testing. Not used on the hot path (the device never
    /// echoes commands back verbatim).
    ///
    pub fn decode(bytes: &[u8], codes: &CommandCodes) -> Result<OutboundCommand, FrameError> {
        if bytes.len() < 4 {
            return Err(FrameError::TooShort);
        }
        let length = bytes[1] as usize;
        if length != bytes.len() {
            return Err(FrameError::UnexpectedLength { message_id: bytes[2], expected: length, got: bytes.len() });
        }
        let command_code = bytes[2];
        let fields = &bytes[3..bytes.len() - 1];

        if command_code == *codes.send_job() && fields.len() == 7 {
            return Ok(OutboundCommand::SendJob {
                command_code,
                direction: Direction::from_u8(fields[0]),
                microstep: fields[1],
                job_id: fields[2],
                pulses: BigEndian::read_u32(&fields[3..7]),
            });
        }
        if command_code == *codes.send_job_with_ramping() && fields.len() == 11 {
            return Ok(OutboundCommand::SendJobWithRamping {
                command_code,
                direction: Direction::from_u8(fields[0]),
                microstep: fields[1],
                job_id: fields[2],
                pulses: BigEndian::read_u32(&fields[3..7]),
                ramping_steps: BigEndian::read_u32(&fields[7..11]),
            });
        }
        if command_code == *codes.send_job_all_variables() && fields.len() == 15 {
            return Ok(OutboundCommand::SendJobAllVariables {
                command_code,
                direction: Direction::from_u8(fields[0]),
                microstep: fields[1],
                job_id: fields[2],
                pulses: BigEndian::read_u32(&fields[3..7]),
                pulse_interval_us: BigEndian::read_u32(&fields[7..11]),
                pulse_on_period: BigEndian::read_u32(&fields[11..15]),
            });
        }
        if command_code == *codes.send_job_all_variables_with_ramping() && fields.len() == 19 {
            return Ok(OutboundCommand::SendJobAllVariablesWithRamping {
                command_code,
                direction: Direction::from_u8(fields[0]),
                microstep: fields[1],
                job_id: fields[2],
                pulses: BigEndian::read_u32(&fields[3..7]),
                pulse_interval_us: BigEndian::read_u32(&fields[7..11]),
                pulse_on_period: BigEndian::read_u32(&fields[11..15]),
                ramping_steps: BigEndian::read_u32(&fields[15..19]),
            });
        }
        if command_code == *codes.send_job_all_variables_with_ramping_and_rate() && fields.len() == 20 {
            return Ok(OutboundCommand::SendJobAllVariablesWithRampingAndRate {
                command_code,
                direction: Direction::from_u8(fields[0]),
                microstep: fields[1],
                job_id: fields[2],
                pulses: BigEndian::read_u32(&fields[3..7]),
                pulse_interval_us: BigEndian::read_u32(&fields[7..11]),
                pulse_on_period: BigEndian::read_u32(&fields[11..15]),
                ramping_steps: BigEndian::read_u32(&fields[15..19]),
                ramp_scaler: fields[19],
            });
        }
        if fields.is_empty() {
            return Ok(OutboundCommand::Control { command_code });
        }

        Err(FrameError::UnknownMessageId(command_code))
    }
}

fn append_u32_be(fields: &mut Vec<u8>, value: u32) {
    let mut bytes = [0u8; 4];
    BigEndian::write_u32(&mut bytes, value);
    fields.extend_from_slice(&bytes);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_support::scenario_config;

    fn codes() -> CommandCodes {
        scenario_config().command_codes().clone()
    }

    #[test]
    fn send_job_round_trips() {
        let cmd = OutboundCommand::SendJob {
            command_code: codes().send_job().clone(),
            direction: Direction::Forward,
            microstep: 32,
            job_id: 7,
            pulses: 6400,
        };
        let bytes = cmd.encode(0x02, 0x03);
        assert_eq!(bytes[0], 0x02);
        assert_eq!(bytes[1], bytes.len() as u8);
        assert_eq!(*bytes.last().unwrap(), 0x03);
        assert_eq!(OutboundCommand::decode(&bytes, &codes()).unwrap(), cmd);
    }

    #[test]
    fn all_variables_with_ramping_and_rate_round_trips() {
        let codes = codes();
        let cmd = OutboundCommand::SendJobAllVariablesWithRampingAndRate {
            command_code: *codes.send_job_all_variables_with_ramping_and_rate(),
            direction: Direction::Reverse,
            microstep: 4,
            job_id: 3,
            pulses: 1000,
            pulse_interval_us: 500,
            pulse_on_period: 20,
            ramping_steps: 50,
            ramp_scaler: 9,
        };
        let bytes = cmd.encode(0x02, 0x03);
        assert_eq!(bytes.len(), 24);
        assert_eq!(bytes[1], 24);
        assert_eq!(OutboundCommand::decode(&bytes, &codes).unwrap(), cmd);
    }

    #[test]
    fn control_frame_has_length_four() {
        let bytes = OutboundCommand::Control { command_code: 0x33 }.encode(0x02, 0x03);
        assert_eq!(bytes, vec![0x02, 0x04, 0x33, 0x03]);
    }

    #[test]
    fn codec_resyncs_past_garbage_to_single_fault_frame() {
        let cfg = scenario_config();
        let fault_id = *cfg.message_ids().motor_fault();
        let mut decoder = FrameDecoder::new(0x02);
        let stream = [0xFF, 0xFF, 0x02, 0x04, fault_id, 0x00, 0x03];
        let frames = decoder.feed_bytes(&stream);
        assert_eq!(frames.len(), 1);
        let parsed = InboundFrame::parse(&frames[0], cfg.message_ids(), *cfg.serial().ack(), 0x03).unwrap();
        assert_eq!(parsed, InboundFrame::Fault);
    }

    #[test]
    fn length_less_than_three_is_dropped_silently() {
        let mut decoder = FrameDecoder::new(0x02);
        assert!(decoder.feed(0x02).is_none());
        assert!(decoder.feed(0x02).is_none()); // length byte 2, too short
        // decoder should be back waiting for STX, not stuck mid-payload
        assert!(decoder.feed(0x02).is_none());
        assert!(decoder.feed(0x04).is_none());
        assert_eq!(decoder.feed(0x33), None);
        assert_eq!(decoder.feed(0x03), Some(vec![0x33, 0x03]));
    }

    #[test]
    fn feedback_frame_decodes_little_endian() {
        let cfg = scenario_config();
        let mut payload = vec![*cfg.message_ids().motor_feedback()];
        payload.extend_from_slice(&1.5f32.to_le_bytes());
        payload.extend_from_slice(&3.25f32.to_le_bytes());
        payload.extend_from_slice(&(-12i16).to_le_bytes());
        payload.push(0x03);

        match InboundFrame::parse(&payload, cfg.message_ids(), *cfg.serial().ack(), 0x03).unwrap() {
            InboundFrame::Feedback { velocity_rad_per_s, angle_rad, encoder_count } => {
                assert!((velocity_rad_per_s - 1.5).abs() < 1e-6);
                assert!((angle_rad - 3.25).abs() < 1e-6);
                assert_eq!(encoder_count, -12);
            }
            other => panic!("expected Feedback, got {other:?}"),
        }
    }

    #[test]
    fn response_ack_flag_matches_configured_ack_byte() {
        let cfg = scenario_config();
        let ack = *cfg.serial().ack();
        let payload = vec![*cfg.message_ids().response(), *cfg.command_codes().send_job(), 1, 0x00, ack, 0x03];
        match InboundFrame::parse(&payload, cfg.message_ids(), ack, 0x03).unwrap() {
            InboundFrame::Response { ack, .. } => assert!(ack),
            other => panic!("expected Response, got {other:?}"),
        }
    }
}
