use crate::cache::StateCache;
use fill_protocol::{decode_message, ServerMessage, ValveName};
use tracing::{debug, error, warn};

/// What happened to one inbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Applied,
    /// Acknowledgement or error report; nothing to cache.
    Acknowledged,
    Dropped,
}

/// Decodes one text frame and folds it into the cache. Never fails: anything
/// that cannot be attributed or decoded is logged and dropped.
pub fn dispatch_text(cache: &StateCache, text: &str) -> Dispatch {
    match decode_message(text) {
        Ok(msg) => {
            cache.touch();
            apply(cache, msg)
        }
        Err(e) => {
            warn!("dropping undecodable message: {e}");
            debug!("undecodable payload: {text}");
            Dispatch::Dropped
        }
    }
}

pub fn apply(cache: &StateCache, msg: ServerMessage) -> Dispatch {
    match msg {
        ServerMessage::AdcData(frame) => {
            cache.replace_sensors(frame);
            Dispatch::Applied
        }
        ServerMessage::ValveState {
            valve,
            actuated,
            continuity,
        } => {
            let Some(name) = valve else {
                debug!("valve_state without valve identifier; cannot attribute, dropped");
                return Dispatch::Dropped;
            };
            let Ok(valve) = name.parse::<ValveName>() else {
                warn!("valve_state for unknown valve {name:?}, dropped");
                return Dispatch::Dropped;
            };
            cache.set_valve(valve, actuated, continuity);
            Dispatch::Applied
        }
        ServerMessage::MavState {
            angle,
            pulse_width_us,
        } => {
            cache.merge_mav(angle, pulse_width_us);
            Dispatch::Applied
        }
        ServerMessage::IgniterContinuity { id, continuity } => {
            let Some(id) = id else {
                debug!("igniter_continuity without id, dropped");
                return Dispatch::Dropped;
            };
            cache.set_igniter_continuity(id, continuity);
            Dispatch::Applied
        }
        ServerMessage::Success => Dispatch::Acknowledged,
        ServerMessage::Error { message } => {
            error!(
                "station reported error: {}",
                message.as_deref().unwrap_or("(no message)")
            );
            Dispatch::Acknowledged
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fill_protocol::IgniterId;

    #[test]
    fn valve_state_with_identifier_updates_that_valve_only() {
        let cache = StateCache::new();
        let out = dispatch_text(
            &cache,
            r#"{"type":"valve_state","valve":"SV3","actuated":true,"continuity":true}"#,
        );
        assert_eq!(out, Dispatch::Applied);
        let snap = cache.snapshot();
        assert!(snap.valve(ValveName::Sv3).actuated);
        assert!(snap.valve(ValveName::Sv3).continuity);
        for v in [ValveName::Sv1, ValveName::Sv2, ValveName::Sv4, ValveName::Sv5] {
            assert!(!snap.valve(v).actuated, "{v}");
        }
    }

    #[test]
    fn valve_state_without_identifier_leaves_cache_untouched() {
        let cache = StateCache::new();
        cache.set_valve(ValveName::Sv1, true, false);
        cache.touch();
        let before = cache.snapshot();

        let out = apply(
            &cache,
            ServerMessage::ValveState {
                valve: None,
                actuated: false,
                continuity: true,
            },
        );

        assert_eq!(out, Dispatch::Dropped);
        assert_eq!(cache.snapshot(), before);
    }

    #[test]
    fn valve_state_for_unknown_valve_is_dropped() {
        let cache = StateCache::new();
        let before = cache.snapshot();
        let out = apply(
            &cache,
            ServerMessage::ValveState {
                valve: Some("SV9".to_string()),
                actuated: true,
                continuity: true,
            },
        );
        assert_eq!(out, Dispatch::Dropped);
        assert_eq!(cache.snapshot(), before);
    }

    #[test]
    fn mav_state_missing_fields_keep_previous_values() {
        let cache = StateCache::new();
        cache.merge_mav(Some(90.0), Some(2000));
        dispatch_text(&cache, r#"{"type":"mav_state","angle":12.0}"#);
        let mav = cache.mav();
        assert_eq!(mav.angle, 12.0);
        assert_eq!(mav.pulse_width_us, 2000);
    }

    #[test]
    fn igniter_continuity_updates_matching_igniter() {
        let cache = StateCache::new();
        dispatch_text(
            &cache,
            r#"{"type":"igniter_continuity","id":2,"continuity":true}"#,
        );
        assert!(cache.igniter(IgniterId::TWO).continuity);
        assert!(!cache.igniter(IgniterId::ONE).continuity);

        let out = dispatch_text(&cache, r#"{"type":"igniter_continuity","continuity":false}"#);
        assert_eq!(out, Dispatch::Dropped);
        assert!(cache.igniter(IgniterId::TWO).continuity);
    }

    #[test]
    fn adc_frames_replace_the_snapshot_wholesale() {
        let cache = StateCache::new();
        let frame = |ts: u64, scaled: Option<f32>| {
            format!(
                r#"{{"type":"adc_data","timestamp_ms":{ts},"valid":true,
                "adc1":[{{"raw":1,"voltage":0.1,"scaled":{s}}},{{"raw":0,"voltage":0.0}},{{"raw":0,"voltage":0.0}},{{"raw":0,"voltage":0.0}}],
                "adc2":[{{"raw":0,"voltage":0.0}},{{"raw":0,"voltage":0.0}},{{"raw":0,"voltage":0.0}},{{"raw":0,"voltage":0.0}}]}}"#,
                s = scaled.map_or("null".to_string(), |v| v.to_string())
            )
        };
        dispatch_text(&cache, &frame(1, Some(500.0)));
        dispatch_text(&cache, &frame(2, None));
        let snap = cache.sensors().unwrap();
        assert_eq!(snap.timestamp_ms, 2);
        assert_eq!(snap.adc1[0].scaled, None);
    }

    #[test]
    fn garbage_and_unknown_types_are_dropped_without_counting_as_activity() {
        let cache = StateCache::new();
        let before = cache.snapshot();
        assert_eq!(dispatch_text(&cache, "{not json"), Dispatch::Dropped);
        assert_eq!(
            dispatch_text(&cache, r#"{"type":"bv_state","open":true}"#),
            Dispatch::Dropped
        );
        assert_eq!(cache.snapshot(), before);
        assert!(cache.last_activity().is_none());

        dispatch_text(&cache, r#"{"type":"success"}"#);
        assert!(cache.last_activity().is_some());
    }

    #[test]
    fn acknowledgements_do_not_touch_state() {
        let cache = StateCache::new();
        assert_eq!(
            dispatch_text(&cache, r#"{"type":"success"}"#),
            Dispatch::Acknowledged
        );
        assert_eq!(
            dispatch_text(&cache, r#"{"type":"error","message":"Unknown valve"}"#),
            Dispatch::Acknowledged
        );
        assert!(cache.sensors().is_none());
    }
}
