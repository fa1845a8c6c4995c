//! Shared networking constants and helpers used by client and server.

/// TCP port for unary `GetRate` calls (request/reply pairs).
pub const UNARY_PORT: u16 = 9092;
/// TCP port for `SubscribeRates` streams (one stream per connection).
pub const STREAM_PORT: u16 = 9093;

/// Helper to format an address with a port like "ip:port".
pub fn addr(ip: &str, port: u16) -> String {
    format!("{}:{}", ip, port)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_host_and_port() {
        assert_eq!(addr("127.0.0.1", UNARY_PORT), "127.0.0.1:9092");
        assert_eq!(addr("localhost", STREAM_PORT), "localhost:9093");
    }
}
