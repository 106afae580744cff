mod session {
    use crate::{
        session::{
            Session,
            SessionState,
        },
        SessionError,
    };
    use aurelius_bgp::{
        prefix::{
            Afi,
            Safi,
        },
        rfc3392::Capability,
        rfc4271::{
            ASPathSegment,
            NlriBlock,
            NotificationMessage,
            PathAttribute,
            PathAttributeValue,
            UpdateMessage,
        },
        rfc6793::AS_TRANS,
        BGPMessage,
    };

    fn session(asn: u32, router_id: u32) -> Session {
        let mut session = Session::new(asn, router_id, 180);
        session.local_protocols = vec![(Afi::IPv4, Safi::Unicast), (Afi::IPv6, Safi::Unicast)];
        session
    }

    #[test]
    fn test_open_message_without_asn4() {
        let session = session(65001, 1);
        let open = session.create_open_message();
        assert_eq!(open.version, 4);
        assert_eq!(open.autonomous_system, 65001);
        assert_eq!(open.hold_time, 180);
        assert_eq!(open.bgp_identifier, 1);
        // One capability parameter per protocol announcement.
        assert_eq!(open.optional_parameters.len(), 2);
    }

    #[test]
    fn test_open_message_with_asn4_uses_as_trans() {
        let mut session = session(65537, 1);
        session.local_capabilities = vec![Capability::FourOctetASN(0)];

        let open = session.create_open_message();
        assert_eq!(open.autonomous_system, AS_TRANS);
        assert!(open
            .capabilities()
            .any(|capability| *capability == Capability::FourOctetASN(65537)));
        assert_eq!(open.effective_asn(), 65537);
    }

    #[test]
    fn test_asn4_negotiation_rebinds_decoder() {
        let mut local = session(65536, 1);
        local.local_capabilities = vec![Capability::FourOctetASN(0)];
        let mut peer = session(65537, 2);
        peer.local_capabilities = vec![Capability::FourOctetASN(0)];

        local.load_peer_data(&peer.create_open_message()).unwrap();
        assert_eq!(local.peer_asn, 65537);
        assert_eq!(local.peer_router_id, 2);
        assert!(local.common_capabilities.contains(&Capability::FourOctetASN(65537)));

        // An AS_PATH carrying four-octet AS numbers decodes as such on the rebound session decoder.
        let update = UpdateMessage {
            withdrawn: NlriBlock::empty(),
            path_attributes: vec![PathAttribute::new(PathAttributeValue::AS4Path {
                kind: 2,
                segments: vec![ASPathSegment::Sequence(vec![65537, 65538])],
            })],
            nlri: NlriBlock::empty(),
        };
        let decoded = local.decoder.decode(&BGPMessage::Update(update.clone()).pack()).unwrap();
        assert_eq!(decoded, BGPMessage::Update(update));
    }

    #[test]
    fn test_negotiation_without_asn4_on_one_side() {
        let mut local = session(65001, 1);
        local.local_capabilities = vec![Capability::FourOctetASN(0)];
        let peer = session(65002, 2);

        local.load_peer_data(&peer.create_open_message()).unwrap();
        assert_eq!(local.peer_asn, 65002);
        assert!(!local
            .common_capabilities
            .iter()
            .any(|capability| matches!(capability, Capability::FourOctetASN(_))));
    }

    #[test]
    fn test_common_protocols_intersection() {
        let mut local = session(65001, 1);
        let mut peer = Session::new(65002, 2, 180);
        peer.local_protocols = vec![(Afi::IPv4, Safi::Unicast), (Afi::IPv4, Safi::Multicast)];

        local.load_peer_data(&peer.create_open_message()).unwrap();
        assert_eq!(
            local.common_protocols.iter().copied().collect::<Vec<_>>(),
            vec![(Afi::IPv4, Safi::Unicast)]
        );
    }

    #[test]
    fn test_hold_time_negotiation_takes_minimum() {
        let mut local = session(65001, 1);
        let mut peer = session(65002, 2);
        peer.hold_time = 90;

        local.load_peer_data(&peer.create_open_message()).unwrap();
        assert_eq!(local.hold_time, 90);
        assert_eq!(local.keepalive_time(), 30);

        let mut local = session(65001, 1);
        peer.hold_time = 0;
        local.load_peer_data(&peer.create_open_message()).unwrap();
        assert_eq!(local.hold_time, 0);
        assert_eq!(local.keepalive_time(), 0);
    }

    #[test]
    fn test_unsupported_version_is_rejected() {
        let mut local = session(65001, 1);
        let mut open = session(65002, 2).create_open_message();
        open.version = 3;

        match local.load_peer_data(&open) {
            Err(SessionError::Notification(notification)) => {
                assert_eq!(notification.error_code, NotificationMessage::OPEN_MESSAGE_ERROR);
                assert_eq!(notification.error_subcode, NotificationMessage::SUBCODE_UNSUPPORTED_VERSION);
            }
            other => panic!("Expected an open message error, got {:?}", other.err()),
        }
    }

    #[test]
    fn test_notification_resets_to_idle() {
        let mut session = session(65001, 1);
        session.state = SessionState::Established;

        let notification = NotificationMessage::new(NotificationMessage::CEASE, 0);
        session.handle_message(&BGPMessage::Notification(notification.clone())).unwrap();
        assert_eq!(session.state, SessionState::Idle);
        assert_eq!(session.last_error, Some(notification));
    }

    #[test]
    fn test_keepalive_confirms_session() {
        let mut session = session(65001, 1);
        session.state = SessionState::OpenConfirm;
        session.handle_message(&BGPMessage::KeepAlive).unwrap();
        assert_eq!(session.state, SessionState::Established);
    }

    #[test]
    fn test_idle_session_ignores_stray_messages() {
        let mut session = session(65001, 1);
        session.handle_message(&BGPMessage::KeepAlive).unwrap();
        assert_eq!(session.state, SessionState::Idle);

        let responses = session
            .handle_message(&BGPMessage::Update(UpdateMessage::default()))
            .unwrap();
        assert!(responses.is_empty());
        assert_eq!(session.state, SessionState::Idle);
    }

    #[test]
    fn test_open_in_open_sent_answers_with_keepalive() {
        let mut local = session(65001, 1);
        local.state = SessionState::OpenSent;
        let open = session(65002, 2).create_open_message();

        let responses = local.handle_message(&BGPMessage::Open(open)).unwrap();
        assert_eq!(local.state, SessionState::OpenConfirm);
        assert_eq!(responses, vec![BGPMessage::KeepAlive]);
    }

    #[test]
    fn test_open_on_confirmed_session_is_fsm_error() {
        let mut local = session(65001, 1);
        local.state = SessionState::OpenConfirm;
        let open = session(65002, 2).create_open_message();

        assert!(matches!(
            local.handle_message(&BGPMessage::Open(open)),
            Err(SessionError::Notification(notification))
                if notification.error_code == NotificationMessage::FSM_ERROR && notification.error_subcode == 2
        ));
    }

    #[test]
    fn test_keepalive_before_open_is_fsm_error() {
        let mut local = session(65001, 1);
        local.state = SessionState::OpenSent;

        assert!(matches!(
            local.handle_message(&BGPMessage::KeepAlive),
            Err(SessionError::Notification(notification))
                if notification.error_code == NotificationMessage::FSM_ERROR && notification.error_subcode == 1
        ));
    }
}

mod server {
    use crate::{
        server::{
            create_tcp_listener,
            BGPServer,
            PeerConfig,
            ServerSession,
        },
        session::SessionState,
        SessionError,
    };
    use aurelius_bgp::{
        prefix::{
            Afi,
            Nlri,
            Safi,
        },
        rfc4271::{
            NotificationMessage,
            Origin,
            PathAttribute,
            PathAttributeValue,
        },
    };
    use aurelius_common::Prefix;
    use aurelius_rt::route::{
        accept_all_filter,
        PeerId,
        Route,
    };
    use core::str::FromStr;
    use std::{
        collections::BTreeSet,
        net::{
            IpAddr,
            Ipv4Addr,
        },
        time::Duration,
    };
    use tokio::time::{
        sleep,
        timeout,
    };

    fn sample_route() -> Route {
        let mut attributes = BTreeSet::new();
        attributes.insert(PathAttribute::new(PathAttributeValue::Origin(Origin::IGP)));
        attributes.insert(PathAttribute::new(PathAttributeValue::NextHop(IpAddr::V4(Ipv4Addr::new(
            127, 0, 0, 1,
        )))));
        Route::new(
            Afi::IPv4,
            Safi::Unicast,
            Nlri::Ip(Prefix::from_str("10.0.0.0/8").unwrap()),
            attributes,
        )
    }

    async fn wait_for<F, Fut>(mut condition: F)
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        timeout(Duration::from_secs(10), async {
            while !condition().await {
                sleep(Duration::from_millis(50)).await;
            }
        })
        .await
        .expect("Condition was not reached in time");
    }

    #[tokio::test]
    async fn test_session_establishment_and_route_propagation() {
        let listener = create_tcp_listener("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let listen_address = listener.local_addr().unwrap();

        // The passive side accepts anything from localhost and imports everything it learns.
        let receiver = BGPServer::new();
        let mut receiver_config = PeerConfig::new(Prefix::from_str("127.0.0.0/8").unwrap(), 65001, Ipv4Addr::new(1, 1, 1, 1));
        receiver_config.local_protocols = vec![(Afi::IPv4, Safi::Unicast)];
        receiver_config.filter_in = accept_all_filter();
        receiver.add_peer(receiver_config).await;
        {
            let receiver = receiver.clone();
            tokio::spawn(async move {
                let _ = receiver.serve(listener).await;
            });
        }

        // The active side dials out and announces one route.
        let sender = BGPServer::new();
        let mut sender_config = PeerConfig::new(Prefix::from_str("127.0.0.0/8").unwrap(), 65002, Ipv4Addr::new(2, 2, 2, 2));
        sender_config.peer_address = Some(listen_address);
        sender_config.active = true;
        sender_config.local_protocols = vec![(Afi::IPv4, Safi::Unicast)];
        sender_config.announcements = vec![sample_route()];
        sender.add_peer(sender_config).await;
        sender.start().await;

        let sender_id = PeerId {
            asn: 65002,
            router_id: u32::from(Ipv4Addr::new(2, 2, 2, 2)),
        };
        wait_for(|| {
            let receiver = receiver.clone();
            async move { receiver.has_session(&sender_id).await }
        })
        .await;

        let key = (Afi::IPv4, Safi::Unicast, Prefix::from_str("10.0.0.0/8").unwrap());
        wait_for(|| {
            let receiver = receiver.clone();
            async move { receiver.loc_rib().await.contains_key(&key) }
        })
        .await;
        {
            let loc_rib = receiver.loc_rib().await;
            let paths = loc_rib.get(&key).unwrap();
            assert_eq!(paths.len(), 1);
            let route = paths.iter().next().unwrap();
            assert_eq!(route.origin(), Some(Origin::IGP));
            assert_eq!(route.source_router, Some(sender_id));
        }

        // Tearing the sender down withdraws its contribution from the receiver's Loc-RIB.
        sender.stop().await;
        wait_for(|| {
            let receiver = receiver.clone();
            async move { !receiver.loc_rib().await.contains_key(&key) }
        })
        .await;
        wait_for(|| {
            let receiver = receiver.clone();
            async move { !receiver.has_session(&sender_id).await }
        })
        .await;
    }

    #[tokio::test]
    async fn test_unknown_peer_is_dropped() {
        let listener = create_tcp_listener("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let listen_address = listener.local_addr().unwrap();

        let receiver = BGPServer::new();
        {
            let receiver = receiver.clone();
            tokio::spawn(async move {
                let _ = receiver.serve(listener).await;
            });
        }

        let sender = BGPServer::new();
        let mut config = PeerConfig::new(Prefix::from_str("127.0.0.0/8").unwrap(), 65002, Ipv4Addr::new(2, 2, 2, 2));
        config.peer_address = Some(listen_address);
        config.active = true;
        // The receiver has no matching template, so the connection just dies and no session appears.
        let result = sender.connect(&config).await;
        assert!(result.is_ok());
        assert!(!receiver.has_session(&PeerId { asn: 65001, router_id: 0 }).await);
    }

    #[tokio::test]
    async fn test_connect_without_address_is_a_configuration_error() {
        let server = BGPServer::new();
        let config = PeerConfig::new(Prefix::from_str("192.0.2.1/32").unwrap(), 65001, Ipv4Addr::new(1, 1, 1, 1));
        assert!(matches!(
            server.connect(&config).await,
            Err(SessionError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn test_collision_resolution_prefers_higher_initiator() {
        let server = BGPServer::new();
        let config = PeerConfig::new(Prefix::from_str("192.0.2.0/24").unwrap(), 65001, Ipv4Addr::new(1, 1, 1, 1));
        let peer_address = IpAddr::V4(Ipv4Addr::new(192, 0, 2, 7));

        // A passive pending session; its initiator identity is the peer's (router id 5, AS 65002).
        let mut first = ServerSession::from_config(&config, peer_address, false);
        first.session.peer_asn = 65002;
        first.session.peer_router_id = 5;
        first.set_state(SessionState::OpenConfirm).await;
        server.register_session(&first).await.unwrap();

        // An active session to the same neighbor; our router id is the initiator and beats the peer's.
        let mut second = ServerSession::from_config(&config, peer_address, true);
        second.session.peer_asn = 65002;
        second.session.peer_router_id = 5;
        second.set_state(SessionState::OpenConfirm).await;
        server.register_session(&second).await.unwrap();

        let first_close = first.close_requested().await;
        assert_eq!(first_close.map(|notification| notification.error_code), Some(NotificationMessage::CEASE));

        // A third, passive session with the losing initiator identity is refused outright.
        let mut third = ServerSession::from_config(&config, peer_address, false);
        third.session.peer_asn = 65002;
        third.session.peer_router_id = 5;
        assert!(matches!(
            server.register_session(&third).await,
            Err(SessionError::Notification(notification)) if notification.error_code == NotificationMessage::CEASE
        ));

        // And nobody beats an established session.
        second.set_state(SessionState::Established).await;
        let mut fourth = ServerSession::from_config(&config, peer_address, true);
        fourth.session.peer_asn = 65002;
        fourth.session.peer_router_id = 5;
        assert!(matches!(
            server.register_session(&fourth).await,
            Err(SessionError::Notification(notification)) if notification.error_code == NotificationMessage::CEASE
        ));
    }
}
