//! Channel-related classifications extracted from event headers.
//!
//! FreeSWITCH reports two independent state axes for a channel:
//! `Channel-State` (the state machine, [`ChannelState`]) and
//! `Channel-Call-State` (the call progress, [`CallState`]). A channel can be
//! `CS_EXECUTE` while its call is still `RINGING`, so the two are kept apart.

use serde::{Deserialize, Serialize};

parse_error!(
    /// Error returned when parsing an invalid channel state string.
    ParseChannelStateError,
    "channel state"
);

wire_enum! {
    error_type: ParseChannelStateError,
    /// Channel state from `switch_channel_state_t`, carried in the
    /// `Channel-State` header (`CS_ROUTING`) and, as an integer, in
    /// `Channel-State-Number`.
    #[derive(Serialize, Deserialize)]
    pub enum ChannelState {
        CsNew => "CS_NEW",
        CsInit => "CS_INIT",
        CsRouting => "CS_ROUTING",
        CsSoftExecute => "CS_SOFT_EXECUTE",
        CsExecute => "CS_EXECUTE",
        CsExchangeMedia => "CS_EXCHANGE_MEDIA",
        CsPark => "CS_PARK",
        CsConsumeMedia => "CS_CONSUME_MEDIA",
        CsHibernate => "CS_HIBERNATE",
        CsReset => "CS_RESET",
        CsHangup => "CS_HANGUP",
        CsReporting => "CS_REPORTING",
        CsDestroy => "CS_DESTROY",
        CsNone => "CS_NONE",
    }
}

impl ChannelState {
    /// Parse from the `Channel-State-Number` integer header value.
    ///
    /// Declaration order matches the numbering of `switch_channel_state_t`.
    pub fn from_number(n: u8) -> Option<Self> {
        Self::ALL
            .get(n as usize)
            .copied()
    }

    /// Integer value matching `switch_channel_state_t`.
    pub fn as_number(&self) -> u8 {
        Self::ALL
            .iter()
            .position(|s| s == self)
            .unwrap_or(0) as u8
    }

    /// Whether the channel is being torn down.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::CsHangup | Self::CsReporting | Self::CsDestroy
        )
    }
}

parse_error!(
    /// Error returned when parsing an invalid call state string.
    ParseCallStateError,
    "call state"
);

wire_enum! {
    error_type: ParseCallStateError,
    /// Call state from `switch_channel_callstate_t`, carried in `Channel-Call-State`.
    #[derive(Serialize, Deserialize)]
    pub enum CallState {
        Down => "DOWN",
        Dialing => "DIALING",
        Ringing => "RINGING",
        Early => "EARLY",
        Active => "ACTIVE",
        Held => "HELD",
        RingWait => "RING_WAIT",
        Hangup => "HANGUP",
        Unheld => "UNHELD",
    }
}

parse_error!(
    /// Error returned when parsing an invalid answer state string.
    ParseAnswerStateError,
    "answer state"
);

wire_enum! {
    error_type: ParseAnswerStateError,
    /// Answer state from the `Answer-State` header. Wire format is lowercase.
    #[derive(Serialize, Deserialize)]
    pub enum AnswerState {
        Hangup => "hangup",
        Answered => "answered",
        Early => "early",
        Ringing => "ringing",
    }
}

parse_error!(
    /// Error returned when parsing an invalid call direction string.
    ParseCallDirectionError,
    "call direction"
);

wire_enum! {
    error_type: ParseCallDirectionError,
    /// Call direction from the `Call-Direction` header. Wire format is lowercase.
    #[derive(Serialize, Deserialize)]
    pub enum CallDirection {
        Inbound => "inbound",
        Outbound => "outbound",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_state_display() {
        assert_eq!(ChannelState::CsNew.to_string(), "CS_NEW");
        assert_eq!(ChannelState::CsExecute.to_string(), "CS_EXECUTE");
        assert_eq!(
            ChannelState::CsExchangeMedia.to_string(),
            "CS_EXCHANGE_MEDIA"
        );
        assert_eq!(ChannelState::CsNone.to_string(), "CS_NONE");
    }

    #[test]
    fn test_channel_state_from_str_case_insensitive() {
        assert_eq!(
            "cs_execute".parse::<ChannelState>(),
            Ok(ChannelState::CsExecute)
        );
        assert_eq!(
            "CS_HANGUP".parse::<ChannelState>(),
            Ok(ChannelState::CsHangup)
        );
    }

    #[test]
    fn test_channel_state_from_str_unknown() {
        let err = "EXECUTE"
            .parse::<ChannelState>()
            .unwrap_err();
        assert_eq!(err.to_string(), "unknown channel state: EXECUTE");
    }

    #[test]
    fn test_channel_state_numbers() {
        assert_eq!(ChannelState::from_number(0), Some(ChannelState::CsNew));
        assert_eq!(ChannelState::from_number(4), Some(ChannelState::CsExecute));
        assert_eq!(ChannelState::from_number(10), Some(ChannelState::CsHangup));
        assert_eq!(ChannelState::from_number(13), Some(ChannelState::CsNone));
        assert_eq!(ChannelState::from_number(14), None);
        for state in ChannelState::ALL {
            assert_eq!(ChannelState::from_number(state.as_number()), Some(*state));
        }
    }

    #[test]
    fn test_channel_state_is_terminal() {
        assert!(ChannelState::CsHangup.is_terminal());
        assert!(ChannelState::CsDestroy.is_terminal());
        assert!(!ChannelState::CsExecute.is_terminal());
    }

    #[test]
    fn test_call_state_round_trip() {
        for state in CallState::ALL {
            assert_eq!(
                state
                    .as_str()
                    .parse::<CallState>(),
                Ok(*state)
            );
        }
        assert_eq!("ring_wait".parse::<CallState>(), Ok(CallState::RingWait));
        assert!("CS_EXECUTE"
            .parse::<CallState>()
            .is_err());
    }

    #[test]
    fn test_answer_state_wire_format_is_lowercase() {
        assert_eq!(AnswerState::Answered.to_string(), "answered");
        assert_eq!("EARLY".parse::<AnswerState>(), Ok(AnswerState::Early));
        assert!("bogus"
            .parse::<AnswerState>()
            .is_err());
    }

    #[test]
    fn test_call_direction() {
        assert_eq!(CallDirection::Outbound.to_string(), "outbound");
        assert_eq!("Inbound".parse::<CallDirection>(), Ok(CallDirection::Inbound));
        assert_eq!(
            "sideways"
                .parse::<CallDirection>()
                .unwrap_err()
                .to_string(),
            "unknown call direction: sideways"
        );
    }
}
