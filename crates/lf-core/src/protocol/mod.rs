pub mod codec;
pub mod envelope;
pub mod messages;
pub mod sequence;

pub use codec::{decode_message, encode_message, encode_message_now, ProtocolError};
pub use envelope::{Envelope, EnvelopeContext, EnvelopeError, EnvelopeLimits, Payload, PayloadKind};
pub use messages::HubMessage;
pub use sequence::SequenceCounter;
