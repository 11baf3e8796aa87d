//! Statistical checks for random port selection

use rand::rngs::StdRng;
use rand::SeedableRng;
use relaymesh_topology::PortRange;

#[test]
fn test_random_port_weights_intervals_by_size() {
    // sizes 10 and 90
    let range = PortRange::parse("1000-1009,2000-2089").unwrap();
    assert_eq!(range.total_ports(), 100);

    let mut rng = StdRng::seed_from_u64(0x5eed);
    let n = 50_000;
    let in_second = (0..n)
        .map(|_| range.random_port_with(&mut rng).unwrap())
        .filter(|port| (2000..=2089).contains(port))
        .count();

    let ratio = in_second as f64 / n as f64;
    assert!((ratio - 0.9).abs() < 0.01, "ratio was {}", ratio);
}

#[test]
fn test_round_trip_preserves_membership() {
    for spec in [
        "80,443,8000-9000",
        "65535",
        "1-1024,3000,3001,40000-40010",
        "9000-9100, 22 ,443",
    ] {
        let range = PortRange::parse(spec).unwrap();
        let reparsed = PortRange::parse(&range.to_string()).unwrap();
        assert_eq!(reparsed, range);
        for port in 1..=u16::MAX {
            assert_eq!(range.contains(port), reparsed.contains(port), "port {}", port);
        }
    }
}

#[test]
fn test_thread_local_random_port() {
    let range = PortRange::parse("30000-30010").unwrap();
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let range = range.clone();
            std::thread::spawn(move || {
                (0..100)
                    .map(|_| range.random_port().unwrap())
                    .all(|p| (30000..=30010).contains(&p))
            })
        })
        .collect();

    for handle in handles {
        assert!(handle.join().unwrap());
    }
}
