use super::*;
use pretty_assertions::assert_eq;
use quickcheck::TestResult;
use quickcheck_macros::quickcheck;

fn nal_unit(seq: u16, nalu: &[u8]) -> H265Packet {
    H265Packet::from_nal_unit(96, seq, 180_000, 0x0BAD_CAFE, false, nalu)
}

fn feed(depacketizer: &mut Depacketizer, packets: Vec<H265Packet>) -> Vec<Vec<H265Packet>> {
    packets
        .into_iter()
        .map(|packet| depacketizer.handle(packet))
        .collect()
}

#[test]
fn test_aggregation_round_trip() {
    let a = nal_unit(1, &[0x26, 0x01, 0xAA]);
    let b = nal_unit(1, &[0x02, 0x01, 0xBB]);

    let ap = Packetizer::default().pack_ap(&[a.clone(), b.clone()]).unwrap();
    let units = Depacketizer::new().handle(ap);

    assert_eq!(units, vec![a, b]);
}

#[test]
fn test_fragmentation_round_trip() {
    let mut nalu = vec![0x26, 0x01];
    nalu.extend((0..5000u32).map(|i| (i * 7) as u8));
    let body = &nalu[2..];

    // caller-chosen split into START, MIDDLE, END
    let packetizer = Packetizer::default();
    let pieces = [
        (FuPosition::Start, &body[..1667]),
        (FuPosition::Middle, &body[1667..3334]),
        (FuPosition::End, &body[3334..]),
    ];
    let fragments: Vec<_> = pieces
        .iter()
        .enumerate()
        .map(|(i, (position, data))| {
            let mut piece = vec![0x26, 0x01];
            piece.extend_from_slice(data);
            packetizer
                .pack_fu(&nal_unit(100 + i as u16, &piece), *position)
                .unwrap()
        })
        .collect();

    let mut depacketizer = Depacketizer::new();
    let outputs = feed(&mut depacketizer, fragments);

    assert!(outputs[0].is_empty());
    assert!(outputs[1].is_empty());
    assert_eq!(outputs[2].len(), 1);
    assert_eq!(outputs[2][0].payload(), &nalu[..]);
    assert_eq!(outputs[2][0].payload().len(), 5002);
}

#[test]
fn test_out_of_order_recovery() {
    let packetizer = Packetizer::default();
    let piece = nal_unit(1, &[0x02, 0x01, 0x11, 0x22]);
    let start = packetizer.pack_fu(&piece, FuPosition::Start).unwrap();
    let middle = packetizer.pack_fu(&piece, FuPosition::Middle).unwrap();
    let end = packetizer.pack_fu(&piece, FuPosition::End).unwrap();

    let mut depacketizer = Depacketizer::new();
    assert!(depacketizer.handle(start.clone()).is_empty());
    assert!(depacketizer.handle(end.clone()).is_empty());

    assert!(depacketizer.handle(start).is_empty());
    assert_eq!(depacketizer.position(), Some(FuPosition::Start));
    assert!(depacketizer.handle(middle).is_empty());
    let units = depacketizer.handle(end);
    assert_eq!(
        units[0].payload(),
        &[0x02, 0x01, 0x11, 0x22, 0x11, 0x22, 0x11, 0x22]
    );
}

#[test]
fn test_nested_packets_rejected() {
    let packetizer = Packetizer::default();
    let a = nal_unit(1, &[0x26, 0x01, 0xAA]);
    let ap = packetizer.pack_ap(&[a.clone(), a.clone()]).unwrap();
    let fu = packetizer.pack_fu(&a, FuPosition::Start).unwrap();

    assert_eq!(packetizer.pack_ap(&[a.clone(), ap]), Err(H265Error::NestedAggregation));
    assert_eq!(
        packetizer.pack_fu(&fu, FuPosition::Middle),
        Err(H265Error::NestedFragmentation)
    );
}

#[test]
fn test_layer_id_survives_aggregation() {
    // LayerId 0b100001: top bit in byte 0, low bits in byte 1
    let a = nal_unit(1, &[0x03, 0x09, 0xAA]);
    assert_eq!(a.layer_id(), Some(0b10_0001));

    let ap = Packetizer::default().pack_ap(&[a.clone()]).unwrap();
    assert_eq!(ap.layer_id(), Some(0b10_0001));

    let units = Depacketizer::new().handle(ap);
    assert_eq!(units[0].layer_id(), Some(0b10_0001));
    assert_eq!(units[0].tid(), Some(1));
}

#[test]
fn test_decoding_order_round_trip() {
    let packetizer = Packetizer::default();
    let units: Vec<_> = [(0xFFFEu16, 0xA0u8), (0xFFFF, 0xA1), (3, 0xA2)]
        .iter()
        .map(|&(don, byte)| {
            nal_unit(1, &[0x02, 0x01, byte])
                .with_donl(true)
                .with_dond(true)
                .with_don(don)
        })
        .collect();

    let ap = packetizer.pack_ap(&units).unwrap();
    let decoded = Depacketizer::new().handle(ap);
    let dons: Vec<_> = decoded.iter().map(|unit| unit.don()).collect();
    assert_eq!(dons, vec![Some(0xFFFE), Some(0xFFFF), Some(3)]);

    let mut big = vec![0x26, 0x01];
    big.extend(std::iter::repeat(0x5A).take(3000));
    let whole = nal_unit(9, &big).with_donl(true).with_don(777);

    let mut depacketizer = Depacketizer::new();
    let mut completed = Vec::new();
    for fragment in packetizer.fragment(&whole, 1200).unwrap() {
        completed.extend(depacketizer.handle(fragment));
    }
    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0].don(), Some(777));
    assert_eq!(completed[0].payload(), &big[..]);
}

#[test]
fn test_paci_is_ignored_between_fragments() {
    let packetizer = Packetizer::default();
    let mut nalu = vec![0x02, 0x01];
    nalu.extend(0..=200u8);
    let fragments = packetizer.fragment(&nal_unit(1, &nalu), 100).unwrap();
    let paci = nal_unit(2, &[0x64, 0x01, 0x00, 0x00]);

    let mut depacketizer = Depacketizer::new();
    let mut completed = Vec::new();
    for (i, fragment) in fragments.into_iter().enumerate() {
        if i == 1 {
            assert!(depacketizer.handle(paci.clone()).is_empty());
        }
        completed.extend(depacketizer.handle(fragment));
    }
    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0].payload(), &nalu[..]);
}

#[quickcheck]
fn fragment_then_reassemble(body: Vec<u8>, mtu: u16, nal_type: u8) -> TestResult {
    let nal_type = nal_type % 48;
    let mtu = 16 + mtu as usize % 1500;
    if body.len() < 3 {
        return TestResult::discard();
    }

    let mut nalu = NALHeader {
        forbidden: false,
        nal_type,
        layer_id: 0,
        tid: 1,
    }
    .encode()
    .to_vec();
    nalu.extend_from_slice(&body);

    let fragments = match Packetizer::default().fragment(&nal_unit(1, &nalu), mtu) {
        Ok(fragments) => fragments,
        Err(err) => return TestResult::error(err.to_string()),
    };

    let mut depacketizer = Depacketizer::new();
    let mut completed = Vec::new();
    for fragment in fragments {
        if fragment.raw_data().len() > mtu {
            return TestResult::failed();
        }
        completed.extend(depacketizer.handle(fragment));
    }

    TestResult::from_bool(completed.len() == 1 && completed[0].payload() == &nalu[..])
}

#[quickcheck]
fn aggregate_then_split(bodies: Vec<Vec<u8>>) -> TestResult {
    if bodies.is_empty() || bodies.len() > 20 {
        return TestResult::discard();
    }

    let units: Vec<_> = bodies
        .iter()
        .map(|body| {
            let mut nalu = vec![0x02, 0x01];
            nalu.extend_from_slice(body);
            nal_unit(5, &nalu)
        })
        .collect();

    let ap = match Packetizer::default().pack_ap(&units) {
        Ok(ap) => ap,
        Err(err) => return TestResult::error(err.to_string()),
    };

    TestResult::from_bool(Depacketizer::new().handle(ap) == units)
}
