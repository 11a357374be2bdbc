//! Wire contract for the UART command protocol (spec §4.6).
//!
//! This module defines tags, payload layouts and response framing as
//! plain data plus a [`Dispatcher`] trait — it does not own a read
//! loop. Per spec §1 the serial command server itself is an external
//! collaborator; "its parsing is the collaborator's concern" (spec
//! §4.6) means *byte framing* (how `total:u32`-prefixed payloads are
//! read off the wire) is someone else's job, while the request/response
//! *shapes* live here. Implements only the multi-layer `'L'/'B'/'I'/'R'`
//! protocol (spec §9: the single-layer `'W'/'I'/'R'` variant is
//! superseded).

/// Maximum layers one `Run` request may describe. Not a spec-named
/// constant; chosen to comfortably cover the XOR-scale networks spec
/// §8 exercises while keeping `Command` stack-sized.
pub const MAX_LAYERS: usize = 8;

/// Per-layer parameters inside a `Run` request (spec §4.6's `R` row).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LayerParams {
    pub n_in_words: u32,
    pub n_out: u32,
    pub w_off: u32,
    pub b_off: u32,
    pub mult: u32,
    pub shift: u32,
    pub zero: u32,
    pub relu: u32,
}

const LAYER_PARAMS_BYTES: usize = 32;

/// A decoded command. Decoding is infallible — see [`Codec::decode`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Ping,
    Configure { mult: u32, shift: u32, relu: u32 },
    LoadWeights { total: u32 },
    LoadBias { total: u32 },
    LoadInput { total: u32 },
    Tile { num_tiles: u32, k_dim: u32, stride: u32 },
    Run { layers: heapless::Vec<LayerParams, MAX_LAYERS> },
    /// An unrecognised tag, or a payload too short for its tag (spec
    /// §7: "unknown command byte... silently ignored").
    Unknown(u8),
}

/// A response frame. `Run` produces several of these in sequence
/// (progress bytes, then `RunComplete`) rather than one value, because
/// spec §4.6 defines the `R` reply as a byte stream, not a single
/// message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Response<'a> {
    /// `K`, sent after `C`/`L`/`B`/`I`/`T`.
    Ack,
    /// `P` (ok) or `O` (not ok) — spec §4.6's `P` row.
    Ping(bool),
    /// One per-neuron progress byte during a `Run`.
    Progress(u8),
    /// The closing `!` plus cycle count and result words.
    RunComplete { cycles: u64, values: &'a [u32] },
}

impl<'a> Response<'a> {
    /// Encodes this frame into `buf`, returning the number of bytes
    /// written, or `None` if `buf` is too small.
    pub fn encode_into(&self, buf: &mut [u8]) -> Option<usize> {
        match *self {
            Response::Ack => {
                *buf.get_mut(0)? = b'K';
                Some(1)
            }
            Response::Ping(ok) => {
                *buf.get_mut(0)? = if ok { b'P' } else { b'O' };
                Some(1)
            }
            Response::Progress(byte) => {
                *buf.get_mut(0)? = byte;
                Some(1)
            }
            Response::RunComplete { cycles, values } => {
                let needed = 1 + 8 + 4 + values.len() * 4;
                if buf.len() < needed {
                    return None;
                }
                buf[0] = b'!';
                buf[1..9].copy_from_slice(&cycles.to_le_bytes());
                buf[9..13].copy_from_slice(&(values.len() as u32).to_le_bytes());
                for (i, word) in values.iter().enumerate() {
                    let at = 13 + i * 4;
                    buf[at..at + 4].copy_from_slice(&word.to_le_bytes());
                }
                Some(needed)
            }
        }
    }
}

/// Decodes command tags and their little-endian payloads (spec §4.6:
/// "Multi-byte fields are little-endian").
pub struct Codec;

impl Codec {
    /// `tag` is the command byte already read off the wire; `payload`
    /// is the command's already-framed body. Never fails: an
    /// unrecognised tag, or a payload too short for its tag, decodes to
    /// [`Command::Unknown`].
    pub fn decode(tag: u8, payload: &[u8]) -> Command {
        match tag {
            b'P' => Command::Ping,
            b'C' => Self::decode_configure(payload).unwrap_or(Command::Unknown(tag)),
            b'L' => Self::decode_total(payload).map_or(Command::Unknown(tag), |total| Command::LoadWeights { total }),
            b'B' => Self::decode_total(payload).map_or(Command::Unknown(tag), |total| Command::LoadBias { total }),
            b'I' => Self::decode_total(payload).map_or(Command::Unknown(tag), |total| Command::LoadInput { total }),
            b'T' => Self::decode_tile(payload).unwrap_or(Command::Unknown(tag)),
            b'R' => Self::decode_run(payload).unwrap_or(Command::Unknown(tag)),
            _ => Command::Unknown(tag),
        }
    }

    fn u32_at(payload: &[u8], offset: usize) -> Option<u32> {
        let bytes: [u8; 4] = payload.get(offset..offset + 4)?.try_into().ok()?;
        Some(u32::from_le_bytes(bytes))
    }

    fn decode_total(payload: &[u8]) -> Option<u32> {
        Self::u32_at(payload, 0)
    }

    fn decode_configure(payload: &[u8]) -> Option<Command> {
        Some(Command::Configure {
            mult: Self::u32_at(payload, 0)?,
            shift: Self::u32_at(payload, 4)?,
            relu: Self::u32_at(payload, 8)?,
        })
    }

    fn decode_tile(payload: &[u8]) -> Option<Command> {
        Some(Command::Tile {
            num_tiles: Self::u32_at(payload, 0)?,
            k_dim: Self::u32_at(payload, 4)?,
            stride: Self::u32_at(payload, 8)?,
        })
    }

    fn decode_run(payload: &[u8]) -> Option<Command> {
        let num_layers = Self::u32_at(payload, 0)? as usize;
        let mut layers = heapless::Vec::new();
        for i in 0..num_layers.min(MAX_LAYERS) {
            let base = 4 + i * LAYER_PARAMS_BYTES;
            let layer = LayerParams {
                n_in_words: Self::u32_at(payload, base)?,
                n_out: Self::u32_at(payload, base + 4)?,
                w_off: Self::u32_at(payload, base + 8)?,
                b_off: Self::u32_at(payload, base + 12)?,
                mult: Self::u32_at(payload, base + 16)?,
                shift: Self::u32_at(payload, base + 20)?,
                zero: Self::u32_at(payload, base + 24)?,
                relu: Self::u32_at(payload, base + 28)?,
            };
            // MAX_LAYERS was checked via `.min` above; push cannot fail.
            let _ = layers.push(layer);
        }
        Some(Command::Run { layers })
    }
}

/// Maps a decoded [`Command`] to an action. `dispatch`'s default body
/// is the full tag → action mapping of spec §4.6; only the per-command
/// methods need implementing.
pub trait Dispatcher {
    fn ping(&mut self) -> bool;
    fn configure(&mut self, mult: u32, shift: u32, relu: u32);
    fn load_weights(&mut self, total: u32);
    fn load_bias(&mut self, total: u32);
    fn load_input(&mut self, total: u32);
    fn tile(&mut self, num_tiles: u32, k_dim: u32, stride: u32);

    /// Runs every described layer, writing the final layer's output
    /// words into `out` and returning `(cycles, count)`. `count` is
    /// the number of words written, always `<= out.len()`.
    fn run(&mut self, layers: &[LayerParams], out: &mut [u32]) -> (u64, usize);

    /// Dispatches one decoded command. `scratch` only backs the
    /// `Run` response's result words — other commands ignore it.
    /// `Command::Unknown` yields `None`, no response byte, matching
    /// spec §7's "silently ignored".
    fn dispatch<'a>(&mut self, command: &Command, scratch: &'a mut [u32]) -> Option<Response<'a>> {
        match command {
            Command::Ping => Some(Response::Ping(self.ping())),
            Command::Configure { mult, shift, relu } => {
                self.configure(*mult, *shift, *relu);
                Some(Response::Ack)
            }
            Command::LoadWeights { total } => {
                self.load_weights(*total);
                Some(Response::Ack)
            }
            Command::LoadBias { total } => {
                self.load_bias(*total);
                Some(Response::Ack)
            }
            Command::LoadInput { total } => {
                self.load_input(*total);
                Some(Response::Ack)
            }
            Command::Tile { num_tiles, k_dim, stride } => {
                self.tile(*num_tiles, *k_dim, *stride);
                Some(Response::Ack)
            }
            Command::Run { layers } => {
                let (cycles, count) = self.run(layers, scratch);
                Some(Response::RunComplete { cycles, values: &scratch[..count] })
            }
            Command::Unknown(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Recorder {
        configured: Option<(u32, u32, u32)>,
        ran: Option<usize>,
    }

    impl Dispatcher for Recorder {
        fn ping(&mut self) -> bool {
            true
        }
        fn configure(&mut self, mult: u32, shift: u32, relu: u32) {
            self.configured = Some((mult, shift, relu));
        }
        fn load_weights(&mut self, _total: u32) {}
        fn load_bias(&mut self, _total: u32) {}
        fn load_input(&mut self, _total: u32) {}
        fn tile(&mut self, _num_tiles: u32, _k_dim: u32, _stride: u32) {}
        fn run(&mut self, layers: &[LayerParams], out: &mut [u32]) -> (u64, usize) {
            self.ran = Some(layers.len());
            let values = [10u32, 20];
            let count = values.len().min(out.len());
            out[..count].copy_from_slice(&values[..count]);
            (42, count)
        }
    }

    #[test]
    fn unknown_tag_decodes_without_failing_and_dispatches_to_nothing() {
        let command = Codec::decode(b'Z', &[]);
        assert_eq!(command, Command::Unknown(b'Z'));
        let mut r = Recorder { configured: None, ran: None };
        assert_eq!(r.dispatch(&command, &mut []), None);
    }

    #[test]
    fn configure_round_trips_little_endian_fields() {
        let payload = [7u32.to_le_bytes(), 3u32.to_le_bytes(), 1u32.to_le_bytes()].concat();
        let command = Codec::decode(b'C', &payload);
        assert_eq!(command, Command::Configure { mult: 7, shift: 3, relu: 1 });

        let mut r = Recorder { configured: None, ran: None };
        let response = r.dispatch(&command, &mut []);
        assert_eq!(response, Some(Response::Ack));
        assert_eq!(r.configured, Some((7, 3, 1)));
    }

    #[test]
    fn run_dispatches_through_to_run_complete() {
        let mut layers = heapless::Vec::new();
        layers.push(LayerParams::default()).unwrap();
        let command = Command::Run { layers };

        let mut r = Recorder { configured: None, ran: None };
        let mut scratch = [0u32; 4];
        let response = r.dispatch(&command, &mut scratch);
        match response {
            Some(Response::RunComplete { cycles, values }) => {
                assert_eq!(cycles, 42);
                assert_eq!(values, &[10, 20]);
            }
            other => panic!("expected RunComplete, got {other:?}"),
        }
        assert_eq!(r.ran, Some(1));
    }

    #[test]
    fn truncated_payload_decodes_to_unknown() {
        let command = Codec::decode(b'C', &[1, 2, 3]);
        assert_eq!(command, Command::Unknown(b'C'));
    }

    #[test]
    fn run_decodes_layer_table_and_clamps_excess_layers() {
        let mut payload = ((MAX_LAYERS + 2) as u32).to_le_bytes().to_vec();
        for i in 0..(MAX_LAYERS + 2) {
            payload.extend_from_slice(&(i as u32).to_le_bytes()); // n_in_words
            payload.extend_from_slice(&[0u8; 28]); // remaining seven u32 fields
        }
        let command = Codec::decode(b'R', &payload);
        match command {
            Command::Run { layers } => assert_eq!(layers.len(), MAX_LAYERS),
            other => panic!("expected Run, got {other:?}"),
        }
    }

    #[test]
    fn ack_response_encodes_single_byte() {
        let mut buf = [0u8; 4];
        let n = Response::Ack.encode_into(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"K");
    }

    #[test]
    fn run_complete_encodes_cycles_and_values() {
        let values = [1u32, 2, 3];
        let response = Response::RunComplete { cycles: 99, values: &values };
        let mut buf = [0u8; 32];
        let n = response.encode_into(&mut buf).unwrap();
        assert_eq!(buf[0], b'!');
        assert_eq!(u64::from_le_bytes(buf[1..9].try_into().unwrap()), 99);
        assert_eq!(u32::from_le_bytes(buf[9..13].try_into().unwrap()), 3);
        assert_eq!(n, 1 + 8 + 4 + 3 * 4);
    }
}
