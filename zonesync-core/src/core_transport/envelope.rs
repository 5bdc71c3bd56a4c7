/*
    envelope.rs - JSON message envelope exchanged with the authority

    { "type": "zone_delta" | "zone_ack" | "ping" | "pong",
      "timestamp": <ms>, "data": { ... }, "messageId": "<uuid>",
      "playerId": "...", "gameId": "..." }

    `data` carries a ZoneDelta for zone_delta and zone_ack. Pongs echo the
    messageId of the ping they answer.
*/

use super::errors::ProtocolError;
use crate::core_zone::{Timestamp, ZoneDelta};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    ZoneDelta,
    ZoneAck,
    Ping,
    Pong,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub timestamp: u64,
    #[serde(default = "empty_object")]
    pub data: JsonValue,
    pub message_id: String,
    pub player_id: String,
    pub game_id: String,
}

fn empty_object() -> JsonValue {
    JsonValue::Object(Default::default())
}

impl Envelope {
    /// New envelope with a fresh message id, stamped now
    pub fn new(
        kind: MessageKind,
        data: JsonValue,
        player_id: impl Into<String>,
        game_id: impl Into<String>,
    ) -> Self {
        Envelope {
            kind,
            timestamp: Timestamp::now().as_millis(),
            data,
            message_id: Uuid::new_v4().to_string(),
            player_id: player_id.into(),
            game_id: game_id.into(),
        }
    }

    /// Zone delta message with a caller-chosen message id
    pub fn zone_delta(
        delta: &ZoneDelta,
        message_id: impl Into<String>,
        player_id: impl Into<String>,
        game_id: impl Into<String>,
    ) -> Result<Self, ProtocolError> {
        let mut envelope =
            Envelope::new(MessageKind::ZoneDelta, serde_json::to_value(delta)?, player_id, game_id);
        envelope.message_id = message_id.into();
        Ok(envelope)
    }

    pub fn ping(player_id: impl Into<String>, game_id: impl Into<String>) -> Self {
        Envelope::new(MessageKind::Ping, empty_object(), player_id, game_id)
    }

    /// Pong answering this ping
    pub fn pong(&self, player_id: impl Into<String>) -> Self {
        let mut pong = Envelope::new(MessageKind::Pong, empty_object(), player_id, self.game_id.clone());
        pong.message_id = self.message_id.clone();
        pong
    }

    /// Acknowledgment of this zone delta, carrying the same delta and message id
    pub fn ack(&self, player_id: impl Into<String>) -> Self {
        let mut ack = Envelope::new(MessageKind::ZoneAck, self.data.clone(), player_id, self.game_id.clone());
        ack.message_id = self.message_id.clone();
        ack
    }

    /// Decode the ZoneDelta carried in `data`
    pub fn delta(&self) -> Result<ZoneDelta, ProtocolError> {
        Ok(serde_json::from_value(self.data.clone())?)
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse and validate an inbound frame
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let envelope: Envelope = serde_json::from_str(text)?;
        if !envelope.data.is_object() {
            return Err(ProtocolError::Malformed("data must be an object".to_string()));
        }
        if envelope.message_id.is_empty() {
            return Err(ProtocolError::Malformed("missing messageId".to_string()));
        }
        Ok(envelope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_zone::DeltaSource;

    #[test]
    fn test_zone_delta_wire_format() {
        let delta = ZoneDelta::new(DeltaSource::Manager, Timestamp(10)).add("h1");
        let envelope = Envelope::zone_delta(&delta, "m-1", "player-1", "game-1").unwrap();
        let json: JsonValue = serde_json::from_str(&envelope.encode().unwrap()).unwrap();

        assert_eq!(json["type"], "zone_delta");
        assert_eq!(json["messageId"], "m-1");
        assert_eq!(json["playerId"], "player-1");
        assert_eq!(json["gameId"], "game-1");
        assert_eq!(json["data"]["added"][0], "h1");
        assert!(json["timestamp"].is_u64());
    }

    #[test]
    fn test_decode_roundtrip_and_delta() {
        let delta = ZoneDelta::new(DeltaSource::Server, Timestamp(3)).remove("x");
        let sent = Envelope::zone_delta(&delta, "m-2", "p", "g").unwrap();
        let received = Envelope::decode(&sent.encode().unwrap()).unwrap();
        assert_eq!(received, sent);
        assert_eq!(received.delta().unwrap(), delta);
    }

    #[test]
    fn test_decode_rejects_malformed() {
        assert!(Envelope::decode("not json").is_err());
        assert!(Envelope::decode(r#"{"type":"nope","timestamp":1,"messageId":"a","playerId":"p","gameId":"g"}"#).is_err());
        assert!(Envelope::decode(r#"{"type":"ping","timestamp":1,"data":[1],"messageId":"a","playerId":"p","gameId":"g"}"#).is_err());
        assert!(Envelope::decode(r#"{"type":"ping","timestamp":1,"messageId":"","playerId":"p","gameId":"g"}"#).is_err());
    }

    #[test]
    fn test_missing_data_defaults_to_object() {
        let env = Envelope::decode(
            r#"{"type":"ping","timestamp":1,"messageId":"a","playerId":"p","gameId":"g"}"#,
        )
        .unwrap();
        assert!(env.data.is_object());
        assert!(env.delta().is_err());
    }

    #[test]
    fn test_pong_and_ack_echo_message_id() {
        let ping = Envelope::ping("client", "g");
        let pong = ping.pong("authority");
        assert_eq!(pong.kind, MessageKind::Pong);
        assert_eq!(pong.message_id, ping.message_id);

        let delta = ZoneDelta::local().add("a");
        let sent = Envelope::zone_delta(&delta, "m-9", "client", "g").unwrap();
        let ack = sent.ack("authority");
        assert_eq!(ack.kind, MessageKind::ZoneAck);
        assert_eq!(ack.message_id, "m-9");
        assert_eq!(ack.delta().unwrap(), delta);
    }
}
