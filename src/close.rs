/// WebSocket close status codes (RFC 6455 §7.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CloseCode(pub u16);

impl CloseCode {
  pub const NORMAL: CloseCode = CloseCode(1000);
  pub const GOING_AWAY: CloseCode = CloseCode(1001);
  pub const PROTOCOL_ERROR: CloseCode = CloseCode(1002);
  pub const UNSUPPORTED: CloseCode = CloseCode(1003);
  pub const INVALID_PAYLOAD: CloseCode = CloseCode(1007);
  pub const POLICY_VIOLATION: CloseCode = CloseCode(1008);
  pub const MESSAGE_TOO_BIG: CloseCode = CloseCode(1009);

  /// Codes a peer may legally send on the wire; 1005/1006/1015 are
  /// reserved for local use and must never appear in a close frame.
  pub fn is_allowed(self) -> bool {
    match self.0 {
      1000..=1003 | 1007..=1011 => true,
      3000..=4999 => true,
      _ => false,
    }
  }
}

impl From<u16> for CloseCode {
  fn from(value: u16) -> Self {
    CloseCode(value)
  }
}
