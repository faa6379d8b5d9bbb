//! End-to-end transfer scenarios: the sender state machine against a
//! scripted receiver, with controlled loss.

use std::collections::{BTreeMap, HashSet, VecDeque};

use skiff_core::Seq;
use skiff_transfer::{AckReply, Segment, Sender, SenderAction, SenderConfig, SenderStats};

/// The real loop's poll cadence.
const STEP_US: u64 = 10_000;

/// A cumulative-ACK receiver: acknowledges each arriving segment and
/// advances its expected cursor over contiguous data, buffering
/// out-of-order arrivals.
#[derive(Debug, Default)]
struct ScriptedReceiver {
    expected: u64,
    buffered: BTreeMap<u64, String>,
    assembled: String,
    eof_count: usize,
}

impl ScriptedReceiver {
    fn accept(&mut self, segment: &Segment) -> AckReply {
        let seq = segment.sequence.get();
        if segment.eof {
            self.eof_count += 1;
        } else if seq == self.expected {
            self.expected += segment.data.len() as u64;
            self.assembled.push_str(&segment.data);
            // Drain any buffered data made contiguous by this arrival.
            while let Some(data) = self.buffered.remove(&self.expected) {
                self.expected += data.len() as u64;
                self.assembled.push_str(&data);
            }
        } else if seq > self.expected {
            self.buffered.insert(seq, segment.data.clone());
        }
        // Duplicates below the cursor are re-acknowledged as-is.
        AckReply::new(segment.sequence, Seq::new(self.expected))
    }
}

/// Drives a sender to completion against the scripted receiver, dropping
/// the first transmission of each sequence number in `drop_once`.
struct Harness {
    sender: Sender,
    receiver: ScriptedReceiver,
    payloads: VecDeque<String>,
    drop_once: HashSet<u64>,
    dropped: HashSet<u64>,
    now_us: u64,
    data_seqs_sent: Vec<u64>,
    eofs_sent: usize,
}

impl Harness {
    fn new(payloads: Vec<String>, drop_once: impl IntoIterator<Item = u64>) -> Self {
        Self {
            sender: Sender::new(SenderConfig::new(), 0),
            receiver: ScriptedReceiver::default(),
            payloads: payloads.into(),
            drop_once: drop_once.into_iter().collect(),
            dropped: HashSet::new(),
            now_us: 0,
            data_seqs_sent: Vec::new(),
            eofs_sent: 0,
        }
    }

    /// Runs poll/refill/deliver cycles until the sender finishes.
    fn run(mut self) -> (SenderStats, ScriptedReceiver, Vec<u64>, f64) {
        for _ in 0..10_000 {
            if self.sender.is_finished() {
                let cwnd = self.sender.cwnd();
                return (self.sender.stats(), self.receiver, self.data_seqs_sent, cwnd);
            }

            let mut actions = VecDeque::from(self.sender.poll(self.now_us));
            while self.sender.wanted_payloads() > 0 {
                match self.payloads.pop_front() {
                    Some(payload) => {
                        actions.extend(self.sender.push_payload(payload, self.now_us));
                    }
                    None => {
                        actions.extend(self.sender.input_exhausted());
                        break;
                    }
                }
            }

            while let Some(action) = actions.pop_front() {
                let SenderAction::Transmit(segment) = action else {
                    continue;
                };
                if segment.eof {
                    self.eofs_sent += 1;
                    continue;
                }
                let seq = segment.sequence.get();
                self.data_seqs_sent.push(seq);
                if self.drop_once.contains(&seq) && self.dropped.insert(seq) {
                    continue; // lost in transit, once
                }
                let reply = self.receiver.accept(&segment);
                actions.extend(self.sender.handle_ack(&reply, self.now_us));
            }

            self.now_us += STEP_US;
        }
        panic!("transfer did not finish");
    }
}

fn payloads_of(total_bytes: usize) -> Vec<String> {
    let data: String = ('a'..='z').cycle().take(total_bytes).collect();
    data.as_bytes()
        .chunks(1000)
        .map(|chunk| String::from_utf8(chunk.to_vec()).unwrap())
        .collect()
}

#[test]
fn test_happy_path_three_kilobytes() {
    let payloads = payloads_of(3000);
    let expected: String = payloads.concat();
    let (stats, receiver, seqs, cwnd) = Harness::new(payloads, []).run();

    // Exactly three data segments at offsets 0, 1000, 2000, then the EOF
    // burst; no retransmissions of any kind.
    assert_eq!(seqs, vec![0, 1000, 2000]);
    assert_eq!(receiver.assembled, expected);
    assert_eq!(receiver.eof_count, 5);
    assert_eq!(stats.retransmits, 0);
    assert_eq!(stats.fast_retransmits, 0);
    assert_eq!(stats.timeouts, 0);
    // Three ACKs in slow start leave the window at 3 or more.
    assert!(cwnd >= 3.0);
}

#[test]
fn test_single_loss_recovers_by_retransmission_timer() {
    let payloads = payloads_of(3000);
    let expected: String = payloads.concat();
    let (stats, receiver, seqs, _) = Harness::new(payloads, [1000]).run();

    // The lost segment went out twice; delivery is complete and in order.
    assert_eq!(seqs.iter().filter(|&&seq| seq == 1000).count(), 2);
    assert_eq!(stats.retransmits, 1);
    assert_eq!(receiver.assembled, expected);
    assert_eq!(receiver.eof_count, 5);
}

#[test]
fn test_triple_duplicates_trigger_fast_retransmit() {
    // Enough data that the window grows to 4+ and a burst of later
    // segments follows the lost one.
    let payloads = payloads_of(10_000);
    let expected: String = payloads.concat();
    let (stats, receiver, _, cwnd) = Harness::new(payloads, [3000]).run();

    // The three deliveries past the hole each acknowledge with
    // expected_seq = 3000; the third triggers the fast retransmit, and the
    // window recovers to the threshold instead of collapsing.
    assert_eq!(stats.fast_retransmits, 1);
    assert_eq!(stats.timeouts, 0);
    assert!(cwnd > 1.0);
    assert_eq!(receiver.assembled, expected);
    assert_eq!(receiver.eof_count, 5);
}

#[test]
fn test_every_byte_is_acknowledged_exactly_once() {
    let payloads = payloads_of(5000);
    let (stats, receiver, seqs, _) = Harness::new(payloads, []).run();

    // One segment per kilobyte offset, each acknowledged once.
    let mut unique = seqs.clone();
    unique.sort_unstable();
    unique.dedup();
    assert_eq!(unique, vec![0, 1000, 2000, 3000, 4000]);
    assert_eq!(stats.acks, 5);
    assert_eq!(receiver.expected, 5000);
}
