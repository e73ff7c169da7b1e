use std::{borrow::Cow, io};

use crate::{Deserialize, Serialize};

type Header = u32;
const HEADER_SIZE: usize = size_of::<Header>();

const ERR_KIND: Header = 0;
const CONTROL_KIND: Header = 1;
const GRADIENT_KIND: Header = 2;
const PARAMS_KIND: Header = 3;

/// The payload data for the `Data` variant of the `Msg` enum.
#[derive(Debug, PartialEq)]
pub enum Payload<'a> {
    /// A gradient slice pushed by a worker to one parameter server.
    Gradient(&'a [f32]),
    /// A parameter slice, either served by a parameter server or sent by the chief
    /// right after an `Init` command.
    Params(&'a [f32]),
}

/// The command for the `Control` variant of the `Msg` enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    /// Worker asks for the server's current parameters.
    Pull,
    /// Chief initializes a server, the parameters follow in the next frame.
    Init { step: u64 },
    /// Server accepted an initialization, or was already initialized.
    Initialized,
    /// Server has no parameters yet, the worker should retry later.
    Uninitialized,
    /// The global step after a gradient was applied.
    Step(u64),
    /// A gradient was applied by a server that doesn't own the global step.
    Ack,
    Disconnect,
}

/// The application layer message for the entire system.
#[derive(Debug, PartialEq)]
pub enum Msg<'a> {
    Control(Command),
    Data(Payload<'a>),
    Err(Cow<'a, str>),
}

impl Msg<'_> {
    /// A short name for the kind of message, meant for logs and errors.
    pub fn kind(&self) -> &'static str {
        match self {
            Msg::Control(_) => "control",
            Msg::Err(_) => "err",
            Msg::Data(Payload::Gradient(_)) => "data/gradient",
            Msg::Data(Payload::Params(_)) => "data/params",
        }
    }

    fn buf_is_too_small<T>(size: usize) -> io::Result<T> {
        Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("The given buffer is too small {size}, must at least be {HEADER_SIZE} bytes"),
        ))
    }

    fn invalid_kind<T>(kind: Header) -> io::Result<T> {
        Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Received an invalid kind header {kind}"),
        ))
    }
}

impl<'a> Serialize<'a> for Msg<'a> {
    fn serialize(&'a self, buf: &mut Vec<u8>) -> Option<&'a [u8]> {
        match self {
            Msg::Err(e) => {
                buf.extend_from_slice(&ERR_KIND.to_be_bytes());
                Some(e.as_bytes())
            }
            Msg::Control(cmd) => {
                buf.extend_from_slice(&CONTROL_KIND.to_be_bytes());

                // SAFETY: Serialize impl for `Command` is derived and not implemented
                //         by hand. Nor has a non string-key map inside.
                serde_json::to_writer(buf, cmd).unwrap();
                None
            }
            Msg::Data(payload) => {
                let (kind, nums) = match payload {
                    Payload::Gradient(grad) => (GRADIENT_KIND, *grad),
                    Payload::Params(params) => (PARAMS_KIND, *params),
                };

                buf.extend_from_slice(&kind.to_be_bytes());
                Some(bytemuck::cast_slice(nums))
            }
        }
    }
}

impl<'a> Deserialize<'a> for Msg<'a> {
    fn deserialize(buf: &'a [u8]) -> io::Result<Self> {
        if buf.len() < HEADER_SIZE {
            return Self::buf_is_too_small(buf.len());
        }

        let (kind_buf, rest) = buf.split_at(HEADER_SIZE);

        // SAFETY: We splitted the buffer to be of size `HEADER_SIZE` just above.
        let kind = Header::from_be_bytes(kind_buf.try_into().unwrap());

        match kind {
            ERR_KIND => {
                let string = std::str::from_utf8(rest)
                    .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;

                Ok(Self::Err(Cow::Borrowed(string)))
            }
            CONTROL_KIND => {
                let cmd = serde_json::from_slice(rest)?;
                Ok(Self::Control(cmd))
            }
            GRADIENT_KIND | PARAMS_KIND => {
                let nums = bytemuck::try_cast_slice(rest).map_err(|err| {
                    io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("Received a misaligned numeric payload: {err}"),
                    )
                })?;

                let payload = match kind {
                    GRADIENT_KIND => Payload::Gradient(nums),
                    _ => Payload::Params(nums),
                };

                Ok(Self::Data(payload))
            }
            kind => Self::invalid_kind(kind),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(msg: &Msg) -> Vec<u32> {
        let mut buf = Vec::new();
        let tail = msg.serialize(&mut buf).map(<[u8]>::to_vec);
        buf.extend(tail.unwrap_or_default());

        // Copy into a u32 backed buffer, just like `OnoReceiver` does.
        let mut aligned = vec![0u32; buf.len().div_ceil(4)];
        bytemuck::cast_slice_mut::<u32, u8>(&mut aligned)[..buf.len()].copy_from_slice(&buf);
        aligned
    }

    #[test]
    fn control_frames_are_json() {
        let msg = Msg::Control(Command::Init { step: 42 });
        let mut buf = Vec::new();
        assert!(msg.serialize(&mut buf).is_none());
        assert_eq!(&buf[HEADER_SIZE..], br#"{"init":{"step":42}}"#);
    }

    #[test]
    fn params_payload_is_viewed_in_place() {
        let params = [1.5f32, -2.0, 0.25];
        let aligned = frame(&Msg::Data(Payload::Params(&params)));
        let bytes = bytemuck::cast_slice(&aligned);

        let msg = Msg::deserialize(bytes).unwrap();
        assert_eq!(msg, Msg::Data(Payload::Params(&params)));
    }

    #[test]
    fn truncated_numeric_payload_is_rejected() {
        let mut buf = GRADIENT_KIND.to_be_bytes().to_vec();
        buf.extend_from_slice(&[0, 0, 128]);

        let mut aligned = vec![0u32; 2];
        bytemuck::cast_slice_mut::<u32, u8>(&mut aligned)[..buf.len()].copy_from_slice(&buf);
        let bytes = &bytemuck::cast_slice::<u32, u8>(&aligned)[..buf.len()];

        let err = Msg::deserialize(bytes).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let buf = 9u32.to_be_bytes();
        assert!(Msg::deserialize(&buf).is_err());
    }
}
