//! Typed event header names.

parse_error!(
    /// Error returned when parsing an unrecognized event header name.
    ParseEventHeaderError,
    "event header"
);

wire_enum! {
    error_type: ParseEventHeaderError,
    /// Well-known header names found inside event bodies and channel data.
    ///
    /// These are the event headers (not envelope headers like
    /// `Content-Type`). Use with [`EslEvent::header()`](crate::EslEvent::header)
    /// for type-safe lookups; any other name still works as a plain string.
    pub enum EventHeader {
        EventName => "Event-Name",
        EventSubclass => "Event-Subclass",
        UniqueId => "Unique-ID",
        CallerUniqueId => "Caller-Unique-ID",
        OtherLegUniqueId => "Other-Leg-Unique-ID",
        ChannelCallUuid => "Channel-Call-UUID",
        JobUuid => "Job-UUID",
        ChannelName => "Channel-Name",
        ChannelState => "Channel-State",
        ChannelStateNumber => "Channel-State-Number",
        ChannelCallState => "Channel-Call-State",
        AnswerState => "Answer-State",
        CallDirection => "Call-Direction",
        HangupCause => "Hangup-Cause",
        CallerCallerIdName => "Caller-Caller-ID-Name",
        CallerCallerIdNumber => "Caller-Caller-ID-Number",
        CallerDestinationNumber => "Caller-Destination-Number",
        CallerContext => "Caller-Context",
        CallerNetworkAddr => "Caller-Network-Addr",
        CoreUuid => "Core-UUID",
        SocketMode => "Socket-Mode",
        Control => "Control",
        ApplicationUuid => "Application-UUID",
        Application => "Application",
        ApplicationResponse => "Application-Response",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(EventHeader::UniqueId.to_string(), "Unique-ID");
        assert_eq!(
            EventHeader::ChannelCallState.to_string(),
            "Channel-Call-State"
        );
        assert_eq!(EventHeader::SocketMode.as_str(), "Socket-Mode");
    }

    #[test]
    fn test_from_str_case_insensitive() {
        assert_eq!(
            "unique-id".parse::<EventHeader>(),
            Ok(EventHeader::UniqueId)
        );
        assert_eq!(
            "CHANNEL-STATE".parse::<EventHeader>(),
            Ok(EventHeader::ChannelState)
        );
    }

    #[test]
    fn test_from_str_unknown() {
        let err = "X-Custom-Not-In-Enum".parse::<EventHeader>();
        assert_eq!(
            err.unwrap_err()
                .to_string(),
            "unknown event header: X-Custom-Not-In-Enum"
        );
    }

    #[test]
    fn test_round_trip_all_variants() {
        for v in EventHeader::ALL {
            let parsed: EventHeader = v
                .as_str()
                .parse()
                .unwrap();
            assert_eq!(parsed, *v);
        }
    }
}
