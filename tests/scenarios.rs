//! End-to-end signing scenarios.
//!
//! These tests drive full signing passes over small zones with the
//! deterministic mock oracle, a fixed clock, and zero signature jitter, and
//! check the chain topology, serial progression, and failure atomicity the
//! engine guarantees.

use bytes::Bytes;
use jiff::Timestamp;

use weir::{
    ExamineMode, FlakyOracle, MockOracle, Name, Nsec3Params, Rdata, Rr, RrClass, RrType,
    SerialPolicy, SignConf, SignKey, SignStats, ZoneData, ZoneError,
};

fn name(text: &str) -> Name {
    Name::from_text(text).unwrap()
}

fn rr(line: &str) -> Rr {
    Rr::from_line(line).unwrap()
}

fn clock() -> Timestamp {
    Timestamp::from_second(1_600_000_000).unwrap()
}

fn csk() -> SignKey {
    SignKey {
        locator: "9a0c2f5d13a64be2a1e6c07d9b5f1834".into(),
        algorithm: 8,
        keytag: 4242,
        flags: 257,
        ksk: true,
        zsk: true,
        publish: true,
    }
}

fn counter_conf() -> SignConf {
    SignConf {
        serial_policy: SerialPolicy::Counter,
        keys: vec![csk()],
        ..SignConf::default()
    }
}

/// The S1 zone: apex with SOA and NS, two hosts, staged and entized.
fn staged_zone() -> ZoneData {
    let mut zd = ZoneData::new();
    zd.add_rr(
        &rr("example. 3600 IN SOA ns1.example. host.example. 0 10800 3600 604800 3600"),
        true,
    )
    .unwrap();
    zd.add_rr(&rr("example. 3600 IN NS ns1.example."), true)
        .unwrap();
    zd.add_rr(&rr("www.example. 3600 IN A 192.0.2.1"), false)
        .unwrap();
    zd.add_rr(&rr("mail.example. 3600 IN A 192.0.2.2"), false)
        .unwrap();
    zd.entize(&name("example.")).unwrap();
    zd.examine(&name("example."), ExamineMode::File).unwrap();
    zd
}

/// Run the S1 zone through a full pass: commit content, chain, sign,
/// commit signatures.
fn signed_zone(conf: &SignConf) -> ZoneData {
    let mut zd = staged_zone();
    let mut stats = SignStats::new();
    zd.commit().unwrap();
    zd.nsecify(RrClass::In, &mut stats).unwrap();
    zd.sign(&name("example."), conf, &MockOracle, &mut stats, clock())
        .unwrap();
    zd.commit().unwrap();
    zd
}

fn nsec_rdata(zd: &ZoneData, owner: &str) -> (Name, Vec<RrType>) {
    let denial = zd.lookup_denial(&name(owner)).expect("denial missing");
    let set = denial.rrset().expect("NSEC missing");
    match &set.rdatas()[0] {
        Rdata::Nsec { next, bitmap } => (next.clone(), bitmap.types().to_vec()),
        other => panic!("expected NSEC rdata, found {other:?}"),
    }
}

//----------- S1 ---------------------------------------------------------------

#[test]
fn s1_nsec_chain_on_three_names() {
    let conf = counter_conf();
    let zd = signed_zone(&conf);

    let (next, bitmap) = nsec_rdata(&zd, "example.");
    assert_eq!(next, name("mail.example."));
    assert_eq!(
        bitmap,
        vec![RrType::Ns, RrType::Soa, RrType::Rrsig, RrType::Nsec]
    );

    let (next, bitmap) = nsec_rdata(&zd, "mail.example.");
    assert_eq!(next, name("www.example."));
    assert_eq!(bitmap, vec![RrType::A, RrType::Rrsig, RrType::Nsec]);

    let (next, bitmap) = nsec_rdata(&zd, "www.example.");
    assert_eq!(next, name("example."));
    assert_eq!(bitmap, vec![RrType::A, RrType::Rrsig, RrType::Nsec]);

    // Counter policy from scratch: internal serial 1.
    assert_eq!(zd.serials().1, 1);

    // Every authoritative RRset and every NSEC carries one signature from
    // the single key.
    for (_, domain) in zd.domains() {
        for set in domain.rrsets() {
            assert_eq!(set.rrsigs().len(), 1, "{} {}", set.owner(), set.rtype());
        }
    }
    for (_, denial) in zd.denials() {
        let set = denial.rrset().unwrap();
        assert_eq!(set.rrsigs().len(), 1);
    }

    // The signed SOA carries the new serial.
    let soa_set = zd
        .lookup_domain(&name("example."))
        .unwrap()
        .rrset(RrType::Soa)
        .unwrap();
    match &soa_set.rdatas()[0] {
        Rdata::Soa(soa) => assert_eq!(soa.serial, 1),
        other => panic!("expected SOA rdata, found {other:?}"),
    }
}

//----------- S2 ---------------------------------------------------------------

#[test]
fn s2_nsec3_opt_out_skips_unsigned_delegation() {
    let mut zd = staged_zone();
    zd.add_rr(&rr("insecure.example. 3600 IN NS ns.other."), false)
        .unwrap();
    zd.entize(&name("example.")).unwrap();
    zd.commit().unwrap();

    let params = Nsec3Params::new(1, 0, Bytes::from_static(&[0xAA]));
    assert!(params.opt_out());
    let mut stats = SignStats::new();
    zd.nsecify3(RrClass::In, &params, &mut stats).unwrap();

    // Denials for the apex, mail and www only; the unsigned delegation is
    // opted out.
    assert_eq!(zd.denials().count(), 3);
    let covered: Vec<Name> = zd
        .denials()
        .filter_map(|(_, denial)| denial.domain().cloned())
        .collect();
    assert!(covered.contains(&name("example.")));
    assert!(covered.contains(&name("mail.example.")));
    assert!(covered.contains(&name("www.example.")));
    assert!(!covered.contains(&name("insecure.example.")));
    assert!(zd
        .lookup_domain(&name("insecure.example."))
        .unwrap()
        .denial()
        .is_none());

    // The chain links each hashed owner to the next, wrapping around.
    let chain: Vec<(Bytes, Bytes)> = zd
        .denials()
        .map(|(_, denial)| {
            let hash = denial.hash().cloned().unwrap();
            let set = denial.rrset().unwrap();
            match &set.rdatas()[0] {
                Rdata::Nsec3 { next_hashed, .. } => (hash, next_hashed.clone()),
                other => panic!("expected NSEC3 rdata, found {other:?}"),
            }
        })
        .collect();
    for (i, (_, next_hashed)) in chain.iter().enumerate() {
        let successor = &chain[(i + 1) % chain.len()].0;
        assert_eq!(next_hashed, successor);
    }
}

//----------- S3 ---------------------------------------------------------------

#[test]
fn s3_nsec3_collision_is_detected() {
    let mut zd = staged_zone();
    zd.commit().unwrap();

    let params = Nsec3Params::new(0, 0, Bytes::new());
    let apex = name("example.");
    zd.add_denial(&name("www.example."), &apex, Some(&params))
        .unwrap();
    let owner = params.hash_name(&name("www.example."), &apex).unwrap();
    assert!(zd.lookup_denial(&owner).is_some());

    // The same hashed owner again: conflict, and the first data point is
    // untouched.
    let err = zd
        .add_denial(&name("www.example."), &apex, Some(&params))
        .unwrap_err();
    assert_eq!(err, ZoneError::Conflict(owner.clone()));
    let denial = zd.lookup_denial(&owner).unwrap();
    assert_eq!(denial.domain(), Some(&name("www.example.")));
}

//----------- S4 ---------------------------------------------------------------

#[test]
fn s4_serial_policy_keep_refuses_stale_inbound() {
    let mut zd = ZoneData::new();
    zd.add_rr(
        &rr("example. 3600 IN SOA ns1.example. host.example. 100 10800 3600 604800 3600"),
        true,
    )
    .unwrap();
    zd.entize(&name("example.")).unwrap();

    let conf = SignConf {
        serial_policy: SerialPolicy::Keep,
        keys: vec![csk()],
        ..SignConf::default()
    };

    // First pass adopts the inbound serial.
    zd.update(&conf, clock()).unwrap();
    assert_eq!(zd.serials().1, 100);
    assert!(zd.initialized());

    // The inbound serial did not move: the serial cannot be kept.
    let err = zd.update(&conf, clock()).unwrap_err();
    assert_eq!(err, ZoneError::SerialNotIncrementing);
    assert_eq!(zd.serials().1, 100);
}

//----------- S5 ---------------------------------------------------------------

#[test]
fn s5_rollback_after_sign_failure_leaves_no_signatures() {
    let conf = counter_conf();
    let mut zd = staged_zone();
    let mut stats = SignStats::new();
    zd.commit().unwrap();
    zd.nsecify(RrClass::In, &mut stats).unwrap();

    // The oracle dies on the second RRset.
    let flaky = FlakyOracle::new(1);
    let err = zd
        .sign(&name("example."), &conf, &flaky, &mut stats, clock())
        .unwrap_err();
    assert!(matches!(err, ZoneError::Hsm(_)));

    zd.rollback();
    for (_, domain) in zd.domains() {
        for set in domain.rrsets() {
            assert!(set.rrsigs().is_empty());
            assert!(set.effective_rrsigs().is_empty());
        }
    }
    for (_, denial) in zd.denials() {
        if let Some(set) = denial.rrset() {
            assert!(set.rrsigs().is_empty());
            assert!(set.effective_rrsigs().is_empty());
        }
    }
    // Rollback is idempotent.
    zd.rollback();

    // A working oracle then produces the S1 zone.
    let mut stats = SignStats::new();
    zd.sign(&name("example."), &conf, &MockOracle, &mut stats, clock())
        .unwrap();
    zd.commit().unwrap();
    assert_eq!(zd.serials().1, 1);
    let (next, _) = nsec_rdata(&zd, "example.");
    assert_eq!(next, name("mail.example."));
    for (_, domain) in zd.domains() {
        for set in domain.rrsets() {
            assert_eq!(set.rrsigs().len(), 1);
        }
    }
}

//----------- S6 ---------------------------------------------------------------

#[test]
fn s6_empty_leaf_is_garbage_collected() {
    let conf = counter_conf();
    let mut zd = signed_zone(&conf);

    zd.del_rr(&rr("www.example. 3600 IN A 192.0.2.1")).unwrap();
    zd.update(&conf, clock()).unwrap();
    assert!(zd.lookup_domain(&name("www.example.")).is_none());
    assert!(zd.lookup_denial(&name("www.example.")).is_none());

    // The next chain pass closes the gap.
    let mut stats = SignStats::new();
    zd.nsecify(RrClass::In, &mut stats).unwrap();
    zd.sign(&name("example."), &conf, &MockOracle, &mut stats, clock())
        .unwrap();
    zd.commit().unwrap();

    assert_eq!(zd.denials().count(), 2);
    let (next, _) = nsec_rdata(&zd, "example.");
    assert_eq!(next, name("mail.example."));
    let (next, _) = nsec_rdata(&zd, "mail.example.");
    assert_eq!(next, name("example."));

    // The apex lost a child.
    assert_eq!(
        zd.lookup_domain(&name("example.")).unwrap().subdomain_count(),
        1
    );
}

//----------- Invariants -------------------------------------------------------

#[test]
fn tree_iterates_in_canonical_order() {
    let mut zd = ZoneData::new();
    for owner in ["zz.example.", "example.", "a.b.example.", "b.example.", "A.example."] {
        zd.add_rr(&rr(&format!("{owner} 3600 IN TXT \"x\"")), owner == "example.")
            .unwrap();
    }
    let names: Vec<String> = zd.domains().map(|(n, _)| n.to_string()).collect();
    assert_eq!(
        names,
        [
            "example.",
            "A.example.",
            "b.example.",
            "a.b.example.",
            "zz.example.",
        ]
    );
}

#[test]
fn entize_builds_complete_parent_chains() {
    let mut zd = ZoneData::new();
    zd.add_rr(
        &rr("example. 3600 IN SOA ns1.example. host.example. 1 2 3 4 5"),
        true,
    )
    .unwrap();
    zd.add_rr(&rr("a.b.c.example. 3600 IN A 192.0.2.9"), false)
        .unwrap();
    zd.entize(&name("example.")).unwrap();

    // Both empty non-terminals exist and chain up to the apex.
    for ent in ["b.c.example.", "c.example."] {
        let domain = zd.lookup_domain(&name(ent)).expect("missing ENT");
        assert!(domain.status().is_ent());
    }
    let mut cursor = name("a.b.c.example.");
    let mut steps = 0;
    while cursor != name("example.") {
        let domain = zd.lookup_domain(&cursor).unwrap();
        let parent = domain.parent().expect("parent link missing").clone();
        assert_eq!(Some(parent.clone()), cursor.parent());
        cursor = parent;
        steps += 1;
        assert!(steps <= 3);
    }
    assert_eq!(
        zd.lookup_domain(&name("c.example.")).unwrap().subdomain_count(),
        1
    );
}

#[test]
fn nsec_chain_is_a_cycle_over_retained_names() {
    let conf = counter_conf();
    let mut zd = staged_zone();
    zd.add_rr(&rr("a.b.example. 3600 IN A 192.0.2.3"), false)
        .unwrap();
    zd.entize(&name("example.")).unwrap();
    let mut stats = SignStats::new();
    zd.commit().unwrap();
    zd.nsecify(RrClass::In, &mut stats).unwrap();
    zd.sign(&name("example."), &conf, &MockOracle, &mut stats, clock())
        .unwrap();
    zd.commit().unwrap();

    // Retained: the apex, a.b, mail, www; the ENT b.example. carries no
    // NSEC.
    assert!(zd.lookup_denial(&name("b.example.")).is_none());
    let retained = 4;
    assert_eq!(zd.denials().count(), retained);
    let mut cursor = name("example.");
    for _ in 0..retained {
        let (next, _) = nsec_rdata(&zd, &cursor.to_string());
        cursor = next;
    }
    assert_eq!(cursor, name("example."));
}

#[test]
fn nsec3_chain_covers_ents_and_is_deterministic() {
    let params = Nsec3Params::new(0, 3, Bytes::from_static(&[0x01, 0x02]));
    let build = || {
        let mut zd = staged_zone();
        zd.add_rr(&rr("a.b.example. 3600 IN A 192.0.2.3"), false)
            .unwrap();
        zd.entize(&name("example.")).unwrap();
        zd.commit().unwrap();
        let mut stats = SignStats::new();
        zd.nsecify3(RrClass::In, &params, &mut stats).unwrap();
        zd
    };

    let first = build();
    // The ENT b.example. is covered, with an empty bitmap.
    let ent_owner = params
        .hash_name(&name("b.example."), &name("example."))
        .unwrap();
    let ent = first.lookup_denial(&ent_owner).expect("ENT not covered");
    match &ent.rrset().unwrap().rdatas()[0] {
        Rdata::Nsec3 { bitmap, .. } => assert!(bitmap.is_empty()),
        other => panic!("expected NSEC3 rdata, found {other:?}"),
    }

    // Hashed owners are byte-identical across runs.
    let second = build();
    let owners = |zd: &ZoneData| -> Vec<String> {
        zd.denials().map(|(owner, _)| owner.to_string()).collect()
    };
    assert_eq!(owners(&first), owners(&second));
    assert_eq!(first.denials().count(), 5);
}

#[test]
fn serial_advances_monotonically_across_passes() {
    let conf = counter_conf();
    let mut zd = signed_zone(&conf);
    let mut previous = zd.serials().1;
    for _ in 0..3 {
        zd.update(&conf, clock()).unwrap();
        let internal = zd.serials().1;
        assert!(weir::serial_gt(internal, previous));
        previous = internal;
    }
}

#[test]
fn backup_roundtrip_restores_the_structure() {
    let conf = counter_conf();
    let zd = signed_zone(&conf);

    let mut buf = Vec::new();
    zd.backup(&mut buf).unwrap();

    let mut restored = ZoneData::new();
    restored.recover_from_backup(buf.as_slice()).unwrap();

    let shape = |zd: &ZoneData| -> Vec<(String, String, u32, Vec<RrType>, Vec<Rdata>)> {
        zd.domains()
            .map(|(name, domain)| {
                (
                    name.to_string(),
                    domain.status().to_string(),
                    domain.subdomain_count(),
                    domain.rrsets().map(|set| set.rtype()).collect(),
                    domain
                        .rrsets()
                        .flat_map(|set| set.rdatas().to_vec())
                        .collect(),
                )
            })
            .collect()
    };
    assert_eq!(shape(&zd), shape(&restored));

    let denial_shape = |zd: &ZoneData| -> Vec<(String, Option<String>, Vec<Rdata>)> {
        zd.denials()
            .map(|(owner, denial)| {
                (
                    owner.to_string(),
                    denial.domain().map(|d| d.to_string()),
                    denial
                        .rrset()
                        .map(|set| set.rdatas().to_vec())
                        .unwrap_or_default(),
                )
            })
            .collect()
    };
    assert_eq!(denial_shape(&zd), denial_shape(&restored));
}

#[test]
fn backup_file_roundtrip() {
    let conf = counter_conf();
    let zd = signed_zone(&conf);

    let dir = tempfile::tempdir().unwrap();
    let path = camino::Utf8PathBuf::from_path_buf(dir.path().join("example.backup")).unwrap();
    weir::backup::write_backup_file(&zd, &path).unwrap();

    let mut restored = ZoneData::new();
    weir::backup::read_backup_file(&mut restored, &path).unwrap();
    assert_eq!(zd.domains().count(), restored.domains().count());
    assert_eq!(zd.denials().count(), restored.denials().count());
}

#[test]
fn recovered_rrsigs_attach_where_they_belong() {
    let conf = counter_conf();
    let zd = signed_zone(&conf);

    let mut buf = Vec::new();
    zd.backup(&mut buf).unwrap();
    let mut restored = ZoneData::new();
    restored.recover_from_backup(buf.as_slice()).unwrap();

    // Feed every signature of the signed zone back in.
    let mut sig_lines = Vec::new();
    zd.print_rrsig(&mut sig_lines).unwrap();
    let text = String::from_utf8(sig_lines).unwrap();
    for line in text.lines() {
        let rrsig = rr(line);
        restored
            .recover_rrsig_from_backup(&rrsig, &csk().locator, csk().flags)
            .unwrap();
    }

    for (_, domain) in restored.domains() {
        for set in domain.rrsets() {
            assert_eq!(set.rrsigs().len(), 1, "{} {}", set.owner(), set.rtype());
        }
    }
    for (_, denial) in restored.denials() {
        assert_eq!(denial.rrset().unwrap().rrsigs().len(), 1);
    }
}

#[test]
fn no_empty_leaf_survives_a_commit() {
    let conf = counter_conf();
    let mut zd = signed_zone(&conf);
    zd.del_rr(&rr("mail.example. 3600 IN A 192.0.2.2")).unwrap();
    zd.del_rr(&rr("www.example. 3600 IN A 192.0.2.1")).unwrap();
    zd.commit().unwrap();

    for (name, domain) in zd.domains() {
        assert!(
            domain.count_rrsets() > 0
                || domain.subdomain_count() > 0
                || domain.status().is_ent(),
            "empty leaf {name} survived the commit"
        );
    }
}

#[test]
fn print_emits_the_zone_and_updates_the_outbound_serial() {
    let conf = counter_conf();
    let mut zd = signed_zone(&conf);
    let mut out = Vec::new();
    zd.print(&mut out).unwrap();
    let text = String::from_utf8(out).unwrap();

    assert!(text.contains("example.\t3600\tIN\tSOA"));
    assert!(text.contains("\tNSEC\t"));
    assert!(text.contains("\tRRSIG\t"));
    // The emitted SOA carries the internal serial, now recorded as
    // written out.
    assert_eq!(zd.serials().1, zd.serials().2);

    let mut empty = ZoneData::new();
    let mut out = Vec::new();
    empty.print(&mut out).unwrap();
    assert_eq!(String::from_utf8(out).unwrap(), "; empty zone\n");
}
