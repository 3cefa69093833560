use std::collections::VecDeque;
use rand::prelude::*;
use collab_ot::*;

fn random_str(len: usize, rng: &mut SmallRng) -> String {
    let alphabet: Vec<char> = "abcdefghijklmnop_δ←𐆐".chars().collect();
    (0..len).map(|_| alphabet[rng.gen_range(0..alphabet.len())]).collect()
}

fn make_random_change(service: &mut CollabService, rng: &mut SmallRng) {
    let doc_len = service.view_len();
    let insert_weight = if doc_len < 100 { 0.6 } else { 0.45 };
    if doc_len == 0 || rng.gen_bool(insert_weight) {
        let pos = rng.gen_range(0..=doc_len);
        let len: usize = rng.gen_range(1..4);
        service.insert(pos, &random_str(len, rng)).unwrap();
    } else {
        let pos = rng.gen_range(0..doc_len);
        let span = rng.gen_range(1..=usize::min(10, doc_len - pos));
        service.delete(pos..pos + span).unwrap();
    }
}

/// Messages from the server to one client, delivered in order.
#[derive(Debug)]
enum Message {
    Ack(ServerRecord),
    Remote(ServerRecord),
    Rejected(Vec<ServerRecord>),
}

struct Peer {
    service: CollabService,
    inbox: VecDeque<Message>,
}

struct Network {
    server: MemoryServer,
    peers: Vec<Peer>,
    /// Submissions on their way to the server.
    outgoing: VecDeque<(usize, Submission)>,
}

impl Network {
    fn new(text: &str, num_peers: usize, options: &CollabOptions) -> Self {
        let server = MemoryServer::new(text);
        let peers = (0..num_peers).map(|i| {
            let (revision, text) = server.open_document();
            Peer {
                service: CollabService::new(format!("peer{i}").as_str(), revision, &text, options.clone()),
                inbox: VecDeque::new(),
            }
        }).collect();
        Self { server, peers, outgoing: VecDeque::new() }
    }

    fn submit(&mut self, idx: usize) {
        if let Some(submission) = self.peers[idx].service.submit_changes() {
            self.outgoing.push_back((idx, submission));
        }
    }

    fn server_step(&mut self) -> bool {
        let Some((idx, submission)) = self.outgoing.pop_front() else { return false; };
        let author = self.peers[idx].service.user().clone();
        match self.server.submit(&author, submission).unwrap() {
            SubmitResult::Accepted(record) => {
                for (i, peer) in self.peers.iter_mut().enumerate() {
                    peer.inbox.push_back(if i == idx {
                        Message::Ack(record.clone())
                    } else {
                        Message::Remote(record.clone())
                    });
                }
            }
            SubmitResult::Rejected { missed } => {
                self.peers[idx].inbox.push_back(Message::Rejected(missed));
            }
        }
        true
    }

    fn deliver(&mut self, idx: usize) -> bool {
        let peer = &mut self.peers[idx];
        let Some(msg) = peer.inbox.pop_front() else { return false; };
        match msg {
            Message::Ack(record) => peer.service.submitted_changes_acknowledged(record).unwrap(),
            Message::Remote(record) => peer.service.handle_external_change(record).unwrap(),
            Message::Rejected(missed) => peer.service.submission_rejected(missed).unwrap(),
        }
        true
    }

    fn settle(&mut self) {
        for _ in 0..1000 {
            let mut progress = false;
            for i in 0..self.peers.len() {
                while self.deliver(i) { progress = true; }
                if self.peers[i].service.sync_state() == SyncState::PendingLocal {
                    self.submit(i);
                }
            }
            while self.server_step() { progress = true; }
            if !progress { return; }
        }
        panic!("network didn't settle");
    }

    fn check_converged(&self) {
        for peer in &self.peers {
            assert_eq!(peer.service.sync_state(), SyncState::Synced);
            assert_eq!(peer.service.head_revision(), self.server.head_revision());
            assert_eq!(peer.service.view_text(), self.server.text());
            peer.service.check();
        }
    }
}

fn undo_target(service: &CollabService) -> Option<Revision> {
    service.history().undo_target().map(|e| e.revision)
}

/// Undo, and sometimes redo and undo again straight away. Nothing else happens in between, so
/// each step must exactly reverse the one before.
fn undo_round_trip(service: &mut CollabService, rng: &mut SmallRng) {
    let target = undo_target(service);
    let before = service.view_text();
    match service.undo() {
        Ok(()) => {}
        Err(CollabError::NoHistoryAvailable) => return,
        Err(e) => panic!("undo failed: {e}"),
    }
    let after = service.view_text();

    if rng.gen_bool(0.5) {
        assert_eq!(service.redo_target(), target);
        service.redo().unwrap();
        assert_eq!(service.view_text(), before);
        assert_eq!(undo_target(service), target);
        service.undo().unwrap();
        assert_eq!(service.view_text(), after);
    }
}

fn redo_round_trip(service: &mut CollabService, rng: &mut SmallRng) {
    let target = service.redo_target();
    let before = service.view_text();
    match service.redo() {
        Ok(()) => {}
        Err(CollabError::NoHistoryAvailable) => return,
        Err(e) => panic!("redo failed: {e}"),
    }

    if rng.gen_bool(0.5) && undo_target(service) == target {
        service.undo().unwrap();
        assert_eq!(service.view_text(), before);
    }
}

fn run_fuzzer(seed: u64, steps: usize, options: &CollabOptions) {
    let mut rng = SmallRng::seed_from_u64(seed);
    let mut net = Network::new("hello", 3, options);

    for _ in 0..steps {
        let idx = rng.gen_range(0..net.peers.len());
        match rng.gen_range(0..10) {
            0..=3 => make_random_change(&mut net.peers[idx].service, &mut rng),
            4 => net.submit(idx),
            5 | 6 => { net.server_step(); }
            7 | 8 => { net.deliver(idx); }
            _ => {
                let service = &mut net.peers[idx].service;
                if rng.gen_bool(0.7) {
                    undo_round_trip(service, &mut rng);
                } else {
                    redo_round_trip(service, &mut rng);
                }
            }
        }
        if rng.gen_bool(0.05) {
            for peer in &net.peers { peer.service.check(); }
        }
    }

    net.settle();
    net.check_converged();
}

#[test]
fn random_peers_converge() {
    for seed in 0..60 {
        run_fuzzer(seed, 200, &CollabOptions::default());
    }
}

#[test]
fn random_peers_converge_with_small_history() {
    let options = CollabOptions::default().with_max_cached_records(4);
    for seed in 100..140 {
        run_fuzzer(seed, 200, &options);
    }
}

#[test]
fn snapshots_mid_flight() {
    let mut rng = SmallRng::seed_from_u64(321);
    let mut net = Network::new("", 2, &CollabOptions::default());

    for _ in 0..300 {
        let idx = rng.gen_range(0..2);
        match rng.gen_range(0..8) {
            0..=3 => make_random_change(&mut net.peers[idx].service, &mut rng),
            4 => net.submit(idx),
            5 => { net.server_step(); }
            6 => { net.deliver(idx); }
            _ => {
                // Save and reload, as if the editor restarted. The queued messages still arrive.
                let peer = &mut net.peers[idx];
                let bytes = peer.service.snapshot().encode();
                let snapshot = CollabSnapshot::decode(&bytes).unwrap();
                let user = peer.service.user().clone();
                let restored = CollabService::from_snapshot(user, CollabOptions::default(), snapshot).unwrap();
                assert_eq!(restored.view_text(), peer.service.view_text());
                peer.service = restored;
            }
        }
    }

    net.settle();
    net.check_converged();
}
