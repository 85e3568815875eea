use crate::CodecError;
use crate::ServiceRoute;

/// Serialization seam for route payloads stored in tree nodes.
///
/// The engine treats payload bytes as opaque; a decode failure is local to
/// one entry and never aborts a sync step.
pub trait RouteCodec: Send + Sync + 'static {
    fn encode(&self, route: &ServiceRoute) -> std::result::Result<Vec<u8>, CodecError>;
    fn decode(&self, bytes: &[u8]) -> std::result::Result<ServiceRoute, CodecError>;
}

/// Default codec: bincode over the serde representation.
#[derive(Debug, Default, Clone, Copy)]
pub struct BincodeCodec;

impl RouteCodec for BincodeCodec {
    fn encode(&self, route: &ServiceRoute) -> std::result::Result<Vec<u8>, CodecError> {
        bincode::serialize(route).map_err(CodecError::Encode)
    }

    fn decode(&self, bytes: &[u8]) -> std::result::Result<ServiceRoute, CodecError> {
        bincode::deserialize(bytes).map_err(CodecError::Decode)
    }
}
