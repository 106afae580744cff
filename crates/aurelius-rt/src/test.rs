mod table {
    use crate::{
        RoutingTable,
        TableError,
    };
    use aurelius_common::Prefix;
    use core::str::FromStr;
    use std::net::IpAddr;

    fn net(s: &str) -> Prefix {
        Prefix::from_str(s).unwrap()
    }

    fn addr(s: &str) -> IpAddr {
        IpAddr::from_str(s).unwrap()
    }

    #[test]
    fn test_most_specific_lookup() {
        let mut table = RoutingTable::new_ipv4();
        table.insert(net("10.0.0.0/8"), "a").unwrap();
        table.insert(net("10.1.0.0/16"), "b").unwrap();
        table.insert(net("10.1.1.0/24"), "c").unwrap();

        assert_eq!(table.lookup_address(&addr("10.1.1.1")).unwrap(), (net("10.1.1.0/24"), &"c"));
        assert_eq!(table.lookup_address(&addr("10.1.2.1")).unwrap(), (net("10.1.0.0/16"), &"b"));
        assert_eq!(table.lookup_address(&addr("10.2.0.1")).unwrap(), (net("10.0.0.0/8"), &"a"));

        table.remove(&net("10.1.0.0/16")).unwrap();
        assert_eq!(table.lookup_address(&addr("10.1.2.1")).unwrap(), (net("10.0.0.0/8"), &"a"));
        assert_eq!(table.lookup_address(&addr("10.1.1.1")).unwrap(), (net("10.1.1.0/24"), &"c"));
    }

    #[test]
    fn test_exact_lookup_and_replacement() {
        let mut table = RoutingTable::new_ipv4();
        table.insert(net("10.0.0.0/8"), 1).unwrap();
        assert_eq!(table.exact(&net("10.0.0.0/8")).unwrap(), &1);

        table.insert(net("10.0.0.0/8"), 2).unwrap();
        assert_eq!(table.exact(&net("10.0.0.0/8")).unwrap(), &2);
        assert_eq!(table.len(), 1);

        assert_eq!(table.exact(&net("10.0.0.0/9")), Err(TableError::NotFound(net("10.0.0.0/9"))));
    }

    #[test]
    fn test_remove_keeps_descendants() {
        let mut table = RoutingTable::new_ipv4();
        table.insert(net("10.0.0.0/8"), "parent").unwrap();
        table.insert(net("10.1.0.0/16"), "middle").unwrap();
        table.insert(net("10.1.1.0/24"), "leaf").unwrap();

        assert_eq!(table.remove(&net("10.1.0.0/16")).unwrap(), "middle");
        assert_eq!(table.exact(&net("10.1.0.0/16")), Err(TableError::NotFound(net("10.1.0.0/16"))));
        assert_eq!(table.exact(&net("10.1.1.0/24")).unwrap(), &"leaf");
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_remove_missing_entry() {
        let mut table: RoutingTable<&str> = RoutingTable::new_ipv4();
        assert_eq!(table.remove(&net("10.0.0.0/8")), Err(TableError::NotFound(net("10.0.0.0/8"))));
    }

    #[test]
    fn test_root_entry() {
        let mut table = RoutingTable::new_ipv4();
        table.insert(net("0.0.0.0/0"), "default").unwrap();
        table.insert(net("10.0.0.0/8"), "ten").unwrap();
        assert_eq!(table.lookup_address(&addr("192.0.2.1")).unwrap(), (net("0.0.0.0/0"), &"default"));

        assert_eq!(table.remove(&net("0.0.0.0/0")).unwrap(), "default");
        assert_eq!(
            table.lookup_address(&addr("192.0.2.1")),
            Err(TableError::NotFound(net("192.0.2.1/32")))
        );
        assert_eq!(table.exact(&net("10.0.0.0/8")).unwrap(), &"ten");
    }

    #[test]
    fn test_insertion_order_independence() {
        let entries = [
            (net("10.0.0.0/8"), "a"),
            (net("10.1.0.0/16"), "b"),
            (net("10.1.1.0/24"), "c"),
            (net("192.168.0.0/16"), "d"),
            (net("192.168.100.0/24"), "e"),
        ];
        let permutations = [[0, 1, 2, 3, 4], [4, 3, 2, 1, 0], [2, 0, 4, 1, 3], [3, 1, 0, 4, 2]];

        for permutation in permutations {
            let mut table = RoutingTable::new_ipv4();
            for index in permutation {
                let (net, value) = entries[index];
                table.insert(net, value).unwrap();
            }
            assert_eq!(table.lookup_address(&addr("10.1.1.200")).unwrap().1, &"c");
            assert_eq!(table.lookup_address(&addr("10.1.99.1")).unwrap().1, &"b");
            assert_eq!(table.lookup_address(&addr("10.200.0.1")).unwrap().1, &"a");
            assert_eq!(table.lookup_address(&addr("192.168.100.7")).unwrap().1, &"e");
            assert_eq!(table.lookup_address(&addr("192.168.1.1")).unwrap().1, &"d");
            assert_eq!(table.len(), entries.len());
        }
    }

    #[test]
    fn test_split_node_grouping() {
        let mut table = RoutingTable::new_ipv4();
        for i in 0..70u8 {
            table.insert(net(&format!("192.168.{}.0/24", i)), i).unwrap();
        }

        assert_eq!(table.len(), 70);
        for i in 0..70u8 {
            let looked_up = table.lookup_address(&addr(&format!("192.168.{}.77", i))).unwrap();
            assert_eq!(looked_up, (net(&format!("192.168.{}.0/24", i)), &i));
        }
    }

    #[test]
    fn test_family_coercion() {
        let mut table = RoutingTable::new();
        table.insert(net("10.0.0.0/8"), "v4").unwrap();
        table.insert(net("2001:db8::/32"), "v6").unwrap();

        assert_eq!(table.lookup_address(&addr("10.1.1.1")).unwrap().1, &"v4");
        assert_eq!(table.lookup_address(&addr("2001:db8::1")).unwrap().1, &"v6");

        let mut v4_table = RoutingTable::new_ipv4();
        assert_eq!(
            v4_table.insert(net("2001:db8::/32"), "v6"),
            Err(TableError::FamilyMismatch(net("2001:db8::/32")))
        );
    }

    #[test]
    fn test_iteration_yields_all_data_nodes() {
        let mut table = RoutingTable::new_ipv4();
        table.insert(net("10.0.0.0/8"), "a").unwrap();
        table.insert(net("10.1.0.0/16"), "b").unwrap();
        table.insert(net("172.16.0.0/12"), "c").unwrap();

        let mut entries: Vec<(Prefix, &&str)> = table.iter().collect();
        entries.sort_by_key(|(net, _)| *net);
        assert_eq!(
            entries,
            vec![(net("10.0.0.0/8"), &"a"), (net("10.1.0.0/16"), &"b"), (net("172.16.0.0/12"), &"c")]
        );
    }
}

mod rib {
    use crate::{
        rib::{
            Rib,
            RibError,
        },
        route::Route,
    };
    use aurelius_bgp::prefix::{
        Afi,
        Nlri,
        Safi,
    };
    use aurelius_common::Prefix;
    use core::str::FromStr;
    use std::collections::BTreeSet;

    fn route(prefix: &str) -> Route {
        Route::new(
            Afi::IPv4,
            Safi::Unicast,
            Nlri::Ip(Prefix::from_str(prefix).unwrap()),
            BTreeSet::new(),
        )
    }

    #[test]
    fn test_add_and_get() {
        let mut rib = Rib::new();
        rib.register_proto((Afi::IPv4, Safi::Unicast));

        let route = route("10.0.0.0/8");
        rib.add(route.clone()).unwrap();
        let key = (Afi::IPv4, Safi::Unicast, Prefix::from_str("10.0.0.0/8").unwrap());
        assert_eq!(rib.get(&key), Some(&route));
        assert_eq!(rib.len(), 1);
    }

    #[test]
    fn test_unregistered_protocol_is_rejected() {
        let mut rib = Rib::new();
        assert_eq!(
            rib.add(route("10.0.0.0/8")),
            Err(RibError::UnsupportedProtocol(Afi::IPv4, Safi::Unicast))
        );
    }

    #[test]
    fn test_register_proto_is_idempotent() {
        let mut rib = Rib::new();
        rib.register_proto((Afi::IPv4, Safi::Unicast));
        rib.add(route("10.0.0.0/8")).unwrap();

        rib.register_proto((Afi::IPv4, Safi::Unicast));
        assert_eq!(rib.len(), 1);
        assert_eq!(rib.protos().collect::<Vec<_>>(), vec![(Afi::IPv4, Safi::Unicast)]);
    }

    #[test]
    fn test_set_semantics() {
        let mut rib = Rib::new();
        rib.register_proto((Afi::IPv4, Safi::Unicast));

        let mut first = route("10.0.0.0/8");
        first.source_router = Some(crate::route::PeerId { asn: 65001, router_id: 1 });
        let mut second = route("10.0.0.0/8");
        second.source_router = Some(crate::route::PeerId { asn: 65002, router_id: 2 });

        rib.add_set(first.clone()).unwrap();
        rib.add_set(second.clone()).unwrap();
        let key = (Afi::IPv4, Safi::Unicast, Prefix::from_str("10.0.0.0/8").unwrap());
        assert_eq!(rib.get(&key).map(BTreeSet::len), Some(2));

        rib.remove_set(&first).unwrap();
        assert_eq!(rib.get(&key).map(BTreeSet::len), Some(1));

        rib.remove_set(&second).unwrap();
        assert!(!rib.contains_key(&key));

        // Withdrawing a path that was never announced is harmless.
        rib.remove_set(&second).unwrap();
    }
}

mod route {
    use crate::route::{
        Route,
        RouteAction,
    };
    use aurelius_bgp::{
        prefix::{
            Afi,
            Nlri,
            Safi,
        },
        rfc4271::{
            NlriBlock,
            Origin,
            PathAttribute,
            PathAttributeValue,
            UpdateMessage,
        },
        rfc4760::{
            MultiprotocolReachNLRI,
            MultiprotocolUnreachNLRI,
        },
    };
    use aurelius_common::Prefix;
    use core::str::FromStr;
    use std::vec;

    fn nlri(prefix: &str) -> Nlri {
        Nlri::Ip(Prefix::from_str(prefix).unwrap())
    }

    #[test]
    fn test_from_update_toplevel() {
        let update = UpdateMessage {
            withdrawn: vec![nlri("192.0.2.0/24")].into(),
            path_attributes: vec![PathAttribute::new(PathAttributeValue::Origin(Origin::IGP))],
            nlri: vec![nlri("10.0.0.0/8")].into(),
        };

        let routes = Route::from_update(&update).unwrap();
        assert_eq!(routes.len(), 2);

        let (action, announced) = &routes[0];
        assert_eq!(*action, RouteAction::Announce);
        assert_eq!(announced.proto(), (Afi::IPv4, Safi::Unicast));
        assert_eq!(announced.nlri, nlri("10.0.0.0/8"));
        assert_eq!(announced.origin(), Some(Origin::IGP));

        let (action, withdrawn) = &routes[1];
        assert_eq!(*action, RouteAction::Withdraw);
        assert_eq!(withdrawn.nlri, nlri("192.0.2.0/24"));
    }

    #[test]
    fn test_from_update_multiprotocol() {
        let reach = MultiprotocolReachNLRI {
            afi: Afi::IPv6,
            safi: Safi::Unicast,
            next_hop: "2001:db8::1".parse::<core::net::Ipv6Addr>().unwrap().octets().to_vec(),
            nlri: vec![nlri("2001:db8:cafe::/48")].into(),
        };
        let unreach = MultiprotocolUnreachNLRI {
            afi: Afi::IPv6,
            safi: Safi::Unicast,
            nlri: vec![nlri("2001:db8:dead::/48")].into(),
        };
        let update = UpdateMessage {
            withdrawn: NlriBlock::empty(),
            path_attributes: vec![
                PathAttribute::new(PathAttributeValue::Origin(Origin::EGP)),
                PathAttribute::new(PathAttributeValue::MpReachNlri(reach)),
                PathAttribute::new(PathAttributeValue::MpUnreachNlri(unreach)),
            ],
            nlri: NlriBlock::empty(),
        };

        let routes = Route::from_update(&update).unwrap();
        assert_eq!(routes.len(), 2);

        let (action, announced) = &routes[0];
        assert_eq!(*action, RouteAction::Announce);
        assert_eq!(announced.proto(), (Afi::IPv6, Safi::Unicast));
        assert_eq!(announced.nlri, nlri("2001:db8:cafe::/48"));
        assert_eq!(announced.origin(), Some(Origin::EGP));
        // The carrying MP_REACH_NLRI attribute stays in the attribute set.
        assert_eq!(announced.attributes.len(), 2);

        let (action, withdrawn) = &routes[1];
        assert_eq!(*action, RouteAction::Withdraw);
        assert_eq!(withdrawn.proto(), (Afi::IPv6, Safi::Unicast));
        assert_eq!(withdrawn.nlri, nlri("2001:db8:dead::/48"));
    }

    #[test]
    fn test_unresolved_update_is_rejected() {
        let update = UpdateMessage {
            withdrawn: NlriBlock::Raw(vec![0x08, 0x0A]),
            path_attributes: vec![],
            nlri: NlriBlock::empty(),
        };
        assert!(Route::from_update(&update).is_err());
    }

    #[test]
    fn test_to_update_message_plain_ipv4() {
        let mut route = Route::new(Afi::IPv4, Safi::Unicast, nlri("10.0.0.0/8"), Default::default());
        route
            .attributes
            .insert(PathAttribute::new(PathAttributeValue::Origin(Origin::IGP)));

        let update = route.to_update_message();
        assert_eq!(update.nlri.nlris(), Some(&[nlri("10.0.0.0/8")][..]));
        assert_eq!(update.path_attributes.len(), 1);

        let withdraw = route.to_withdraw_message();
        assert_eq!(withdraw.withdrawn.nlris(), Some(&[nlri("10.0.0.0/8")][..]));
        assert!(withdraw.path_attributes.is_empty());
    }

    #[test]
    fn test_to_update_message_multiprotocol() {
        let route = Route::new(Afi::IPv6, Safi::Unicast, nlri("2001:db8::/32"), Default::default());

        let update = route.to_update_message();
        assert_eq!(update.nlri.nlris(), Some(&[][..]));
        let PathAttributeValue::MpReachNlri(reach) = &update.path_attributes[0].value else {
            panic!("Attribute is not MP_REACH_NLRI");
        };
        assert_eq!(reach.afi, Afi::IPv6);
        assert_eq!(reach.nlri.nlris(), Some(&[nlri("2001:db8::/32")][..]));

        let withdraw = route.to_withdraw_message();
        let PathAttributeValue::MpUnreachNlri(unreach) = &withdraw.path_attributes[0].value else {
            panic!("Attribute is not MP_UNREACH_NLRI");
        };
        assert_eq!(unreach.nlri.nlris(), Some(&[nlri("2001:db8::/32")][..]));
    }

    #[test]
    fn test_accessors() {
        let mut route = Route::new(Afi::IPv4, Safi::Unicast, nlri("10.0.0.0/8"), Default::default());
        route.attributes.insert(PathAttribute::new(PathAttributeValue::LocalPref(200)));
        route.attributes.insert(PathAttribute::new(PathAttributeValue::MultiExitDisc(50)));
        route.attributes.insert(PathAttribute::new(PathAttributeValue::AtomicAggregate));
        route.attributes.insert(PathAttribute::new(PathAttributeValue::Aggregator4 {
            kind: 18,
            asn: 65537,
            address: "10.0.0.1".parse().unwrap(),
        }));

        assert_eq!(route.local_pref(), Some(200));
        assert_eq!(route.med(), Some(50));
        assert!(route.atomic_aggregate());
        assert_eq!(route.aggregator(), Some((65537, "10.0.0.1".parse().unwrap())));
        assert_eq!(route.origin(), None);
        assert_eq!(route.ip_prefix(), Some(&Prefix::from_str("10.0.0.0/8").unwrap()));
    }
}
