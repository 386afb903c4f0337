//! The routing decision: which destinations receive a frame.
//!
//! Kept as pure functions over configuration so the policy can be tested
//! without sockets or tasks; the dispatcher applies [`eligible`] to the
//! live endpoint registry.

use crate::{
    config::{RoutingMode, ServiceConfig},
    frame::AudioFrame,
};

/// Whether `dest` may receive `frame`.
///
/// `source` is the producing endpoint's configuration when it is
/// registered; frames injected by external collaborators route with no
/// source-side policy.
pub(crate) fn eligible(
    frame: &AudioFrame,
    mode: RoutingMode,
    source: Option<&ServiceConfig>,
    dest: &ServiceConfig,
) -> bool {
    if !dest.enabled || !dest.can_receive {
        return false;
    }

    // Self-routing is suppressed unconditionally.
    if dest.id == frame.source_id {
        return false;
    }

    if frame.exclude_ids.iter().any(|id| *id == dest.id) {
        return false;
    }

    match mode {
        RoutingMode::AllToAll => {},
        RoutingMode::HubOnly | RoutingMode::None => return false,
    }

    if let Some(source) = source {
        if !source.can_send {
            return false;
        }
        if source.exclude_services.iter().any(|id| *id == dest.id) {
            return false;
        }
        if !source.send_to_types.is_empty() && !source.send_to_types.contains(&dest.kind) {
            return false;
        }
    }

    if !dest.receive_from.is_empty() && !dest.receive_from.contains(&frame.source_type) {
        return false;
    }

    if !frame.route_to_types.is_empty() && !frame.route_to_types.contains(&dest.kind) {
        return false;
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServiceType;
    use bytes::Bytes;

    fn frame_from(source: &ServiceConfig) -> AudioFrame {
        let mut frame = AudioFrame::pcm(source.id.clone(), source.kind, Bytes::new());
        frame.ptt_active = true;
        frame
    }

    fn trio() -> (ServiceConfig, ServiceConfig, ServiceConfig) {
        (
            ServiceConfig::new(ServiceType::Usrp, "usrp_1"),
            ServiceConfig::new(ServiceType::WhoTalkie, "wt_1"),
            ServiceConfig::new(ServiceType::Discord, "disc_1"),
        )
    }

    fn ids<'a>(
        frame: &AudioFrame,
        mode: RoutingMode,
        source: &ServiceConfig,
        dests: impl IntoIterator<Item = &'a ServiceConfig>,
    ) -> Vec<&'a str> {
        dests
            .into_iter()
            .filter(|d| eligible(frame, mode, Some(source), d))
            .map(|d| d.id.as_str())
            .collect()
    }

    #[test]
    fn all_to_all_fans_out_to_everyone_else() {
        let (usrp, wt, disc) = trio();
        let frame = frame_from(&usrp);

        assert_eq!(
            ids(&frame, RoutingMode::AllToAll, &usrp, [&usrp, &wt, &disc]),
            vec!["wt_1", "disc_1"],
        );
    }

    #[test]
    fn hub_only_and_none_route_nothing() {
        let (usrp, wt, disc) = trio();
        let frame = frame_from(&usrp);

        for mode in [RoutingMode::HubOnly, RoutingMode::None] {
            assert!(ids(&frame, mode, &usrp, [&wt, &disc]).is_empty());
        }
    }

    #[test]
    fn source_never_routes_to_itself() {
        let (usrp, _, _) = trio();
        let frame = frame_from(&usrp);

        assert!(!eligible(&frame, RoutingMode::AllToAll, Some(&usrp), &usrp));
    }

    #[test]
    fn frame_exclusions_honoured() {
        let (usrp, wt, disc) = trio();
        let mut frame = frame_from(&usrp);
        frame.exclude_ids = vec!["wt_1".into()];

        assert_eq!(
            ids(&frame, RoutingMode::AllToAll, &usrp, [&wt, &disc]),
            vec!["disc_1"],
        );
    }

    #[test]
    fn source_exclusions_honoured() {
        let (mut usrp, wt, disc) = trio();
        usrp.exclude_services = vec!["disc_1".into()];
        let frame = frame_from(&usrp);

        assert_eq!(
            ids(&frame, RoutingMode::AllToAll, &usrp, [&wt, &disc]),
            vec!["wt_1"],
        );
    }

    #[test]
    fn send_to_types_filters_destinations() {
        let (usrp, wt, disc) = trio();
        let usrp = usrp.send_to_types([ServiceType::Discord]);
        let frame = frame_from(&usrp);

        assert_eq!(
            ids(&frame, RoutingMode::AllToAll, &usrp, [&wt, &disc]),
            vec!["disc_1"],
        );
    }

    #[test]
    fn receive_from_filters_sources() {
        let (usrp, wt, disc) = trio();
        let wt = wt.receive_from([ServiceType::Discord]);
        let frame = frame_from(&usrp);

        assert_eq!(
            ids(&frame, RoutingMode::AllToAll, &usrp, [&wt, &disc]),
            vec!["disc_1"],
        );
    }

    #[test]
    fn frame_route_to_types_filters_destinations() {
        let (usrp, wt, disc) = trio();
        let mut frame = frame_from(&usrp);
        frame.route_to_types = vec![ServiceType::WhoTalkie];

        assert_eq!(
            ids(&frame, RoutingMode::AllToAll, &usrp, [&wt, &disc]),
            vec!["wt_1"],
        );
    }

    #[test]
    fn disabled_and_deaf_destinations_skipped() {
        let (usrp, mut wt, mut disc) = trio();
        wt.enabled = false;
        disc.can_receive = false;
        let frame = frame_from(&usrp);

        assert!(ids(&frame, RoutingMode::AllToAll, &usrp, [&wt, &disc]).is_empty());
    }

    #[test]
    fn mute_source_routes_nothing() {
        let (mut usrp, wt, _) = trio();
        usrp.can_send = false;
        let frame = frame_from(&usrp);

        assert!(!eligible(&frame, RoutingMode::AllToAll, Some(&usrp), &wt));
    }

    #[test]
    fn unregistered_source_routes_by_frame_policy_only() {
        let (_, wt, _) = trio();
        let mut frame = AudioFrame::pcm("ext_0", ServiceType::Generic, Bytes::new());
        frame.route_to_types = vec![ServiceType::WhoTalkie];

        assert!(eligible(&frame, RoutingMode::AllToAll, None, &wt));
    }
}
