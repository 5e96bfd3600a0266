use ekcp::config::{KcpConfig, Mode};
use ekcp::sim::{run_echo, LatencySimulator, SimConfig, SimEndpoint};
use ekcp::ControlBlock;

fn network(lost_rate: u32, rtt_min: u32, rtt_max: u32, seed: u64) -> SimConfig {
    SimConfig {
        lost_rate,
        rtt_min,
        rtt_max,
        seed,
        ..Default::default()
    }
}

#[test]
fn round_trip_on_clean_link() {
    let report = run_echo(
        &KcpConfig::for_mode(Mode::Normal),
        &network(0, 100, 100, 1),
        1000,
    )
    .unwrap();
    assert_eq!(report.echoes, 1000);
    assert!(
        (95..=110).contains(&report.avg_rtt),
        "avg rtt {}",
        report.avg_rtt
    );
    assert_eq!(report.stats.timeout_resends, 0);
    assert_eq!(report.stats.fast_resends, 0);
}

#[test]
fn ordered_delivery_despite_loss_reordering_and_duplication() {
    let sim = SimConfig {
        dup_rate: 10,
        ..network(20, 60, 225, 11)
    };
    // run_echo fails on any echo that comes back out of order.
    let report = run_echo(&KcpConfig::for_mode(Mode::Fast), &sim, 300).unwrap();
    assert_eq!(report.echoes, 300);
    assert!(report.net.lost > 0);
    assert!(report.net.duplicated > 0);
    assert!(report.stats.fast_resends + report.stats.timeout_resends > 0);
}

#[test]
fn every_mode_survives_loss() {
    for &mode in Mode::ALL.iter() {
        let report = run_echo(&KcpConfig::for_mode(mode), &network(10, 60, 125, 5), 200)
            .unwrap_or_else(|err| panic!("{} mode: {:#}", mode, err));
        assert_eq!(report.echoes, 200, "{} mode", mode);
    }
}

#[test]
fn eventual_delivery_on_very_lossy_link() {
    let report = run_echo(
        &KcpConfig::for_mode(Mode::Fast),
        &network(40, 60, 125, 99),
        50,
    )
    .unwrap();
    assert_eq!(report.echoes, 50);
}

#[test]
fn redundancy_lowers_latency() {
    let sim = network(10, 60, 125, 2024);
    let plain = run_echo(&KcpConfig::for_mode(Mode::Fast), &sim, 1000).unwrap();
    let redundant = run_echo(&KcpConfig::for_mode(Mode::Redundancy), &sim, 1000).unwrap();
    assert_eq!(plain.stats.redundant_sends, 0);
    assert!(redundant.stats.redundant_sends > 0);
    assert!(
        redundant.avg_rtt < plain.avg_rtt,
        "redundant {} vs plain {}",
        redundant.avg_rtt,
        plain.avg_rtt
    );
}

#[test]
fn large_messages_reassemble_over_lossy_link() {
    let net = LatencySimulator::shared(SimConfig {
        dup_rate: 5,
        ..network(10, 60, 225, 3)
    });
    let (left, right) = SimEndpoint::pair(&net);
    let config = KcpConfig::for_mode(Mode::Fast);
    let mut a = ControlBlock::with_config(1, &config, left).unwrap();
    let mut b = ControlBlock::with_config(1, &config, right).unwrap();
    let mss = a.mss() as usize;
    let messages: Vec<Vec<u8>> = (0..20)
        .map(|i| (0..i * mss / 3 + 1).map(|j| (i + j) as u8).collect())
        .collect();
    for message in &messages {
        a.send(message).unwrap();
    }

    let mut received = Vec::new();
    for now in 0..60_000 {
        net.borrow_mut().set_current(now);
        while let Some(datagram) = b.user().recv() {
            b.input(&datagram).unwrap();
        }
        while let Some(datagram) = a.user().recv() {
            a.input(&datagram).unwrap();
        }
        while let Ok(message) = b.recv_vec() {
            received.push(message);
        }
        a.update(now);
        b.update(now);
        if received.len() == messages.len() && a.all_flushed() {
            break;
        }
    }
    assert_eq!(received, messages);
    assert!(a.all_flushed());
}

#[test]
fn admission_respects_windows_on_lossy_link() {
    let net = LatencySimulator::shared(network(20, 60, 225, 17));
    let (left, right) = SimEndpoint::pair(&net);
    let config = KcpConfig::for_mode(Mode::Default);
    let mut a = ControlBlock::with_config(1, &config, left).unwrap();
    let mut b = ControlBlock::with_config(1, &config, right).unwrap();
    for i in 0..500u32 {
        a.send(&i.to_le_bytes()).unwrap();
    }

    let mut received = 0u32;
    let mut admissions = 0;
    for now in 0..600_000 {
        net.borrow_mut().set_current(now);
        while let Some(datagram) = b.user().recv() {
            b.input(&datagram).unwrap();
        }
        while let Some(datagram) = a.user().recv() {
            a.input(&datagram).unwrap();
        }
        while let Ok(message) = b.recv_vec() {
            assert_eq!(message, received.to_le_bytes());
            received += 1;
        }

        let window = a.cwnd().min(a.snd_wnd().min(a.rmt_wnd()) as u32);
        let (una, nxt) = (a.snd_una(), a.snd_nxt());
        a.update(now);
        if a.snd_nxt() != nxt {
            admissions += 1;
            assert_eq!(a.snd_una(), una);
            assert!(
                a.snd_nxt().wrapping_sub(una) <= window,
                "admitted up to {} with una {} and window {} at {}",
                a.snd_nxt(),
                una,
                window,
                now
            );
        }
        b.update(now);
        if received == 500 && a.all_flushed() {
            break;
        }
    }
    assert_eq!(received, 500);
    assert!(admissions > 0);
    assert!(a.stats().timeout_resends > 0);
}
