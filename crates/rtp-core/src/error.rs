use thiserror::Error;

/// Error type for RTP operations
#[derive(Debug, Error, Clone)]
pub enum Error {
    /// Error when encoding an RTP or RTCP packet
    #[error("Failed to encode RTP packet: {0}")]
    EncodeError(String),

    /// Invalid packet format
    #[error("Invalid RTP packet format: {0}")]
    InvalidPacket(String),

    /// Buffer too small
    #[error("Buffer too small for RTP packet: need {required} but have {available}")]
    BufferTooSmall {
        required: usize,
        available: usize,
    },

    /// Invalid parameter for RTP operation
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// RTCP error
    #[error("RTCP error: {0}")]
    RtcpError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let encode_err = Error::EncodeError("test error".to_string());
        assert_eq!(encode_err.to_string(), "Failed to encode RTP packet: test error");

        let buffer_err = Error::BufferTooSmall { required: 12, available: 4 };
        assert_eq!(buffer_err.to_string(), "Buffer too small for RTP packet: need 12 but have 4");

        let rtcp_err = Error::RtcpError("empty FCI".to_string());
        assert_eq!(rtcp_err.to_string(), "RTCP error: empty FCI");
    }
}
