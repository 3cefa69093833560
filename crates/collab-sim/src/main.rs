use std::collections::VecDeque;
use std::fs;
use std::path::PathBuf;

use anyhow::{anyhow, bail, Context};
use clap::{Parser, Subcommand};
use rand::prelude::*;
use serde::Serialize;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use collab_ot::{Changeset, CollabError, CollabOptions, CollabService, CollabSnapshot, MemoryServer, ServerRecord, Side, Submission, SubmitResult, SyncState};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a group of simulated editors against an in-memory server and check they converge
    Simulate {
        /// Number of editors
        #[arg(short, long, default_value_t = 3)]
        peers: usize,

        /// Number of random actions before the network settles
        #[arg(short, long, default_value_t = 1000)]
        steps: usize,

        /// RNG seed. If not specified, a random seed is chosen.
        #[arg(long)]
        seed: Option<u64>,

        /// Starting document text
        #[arg(short, long, default_value = "")]
        text: String,

        /// How many history records each editor keeps in memory
        #[arg(long)]
        max_cached_records: Option<usize>,

        /// Also save a snapshot of the first editor to this file when the run finishes
        #[arg(long)]
        save_snapshot: Option<PathBuf>,
    },

    /// Apply a JSON changeset (eg `[3, "hi", {"d": 2}]`) to some text
    Apply {
        text: String,
        changeset: String,
    },

    /// Transform two concurrent JSON changesets against each other
    Transform {
        a: String,
        b: String,
    },

    /// Print the contents of a binary snapshot file as JSON
    Inspect {
        filename: PathBuf,

        /// Pretty print the JSON output
        #[arg(short, long)]
        pretty: bool,
    },
}

fn parse_changeset(json: &str) -> anyhow::Result<Changeset> {
    serde_json::from_str(json).with_context(|| format!("invalid changeset {json}"))
}

fn print_json<T: Serialize>(value: &T, pretty: bool) -> anyhow::Result<()> {
    let out = if pretty { serde_json::to_string_pretty(value)? } else { serde_json::to_string(value)? };
    println!("{out}");
    Ok(())
}

#[derive(Debug, Serialize)]
struct TransformOutput {
    a_prime: Changeset,
    b_prime: Changeset,
}

#[derive(Debug, Default, Serialize)]
struct SimStats {
    seed: u64,
    peers: usize,
    steps: usize,
    typing: usize,
    undos: usize,
    redos: usize,
    submissions: usize,
    rejections: usize,
    resyncs: usize,
    pages_fetched: usize,
    final_revision: u64,
    final_len: usize,
}

enum Message {
    Ack(ServerRecord),
    Remote(ServerRecord),
    Rejected(Vec<ServerRecord>),
}

struct Peer {
    service: CollabService,
    inbox: VecDeque<Message>,
}

struct Sim {
    server: MemoryServer,
    peers: Vec<Peer>,
    outgoing: VecDeque<(usize, Submission)>,
    stats: SimStats,
}

impl Sim {
    fn new(text: &str, num_peers: usize, options: &CollabOptions) -> Self {
        let server = MemoryServer::new(text);
        let peers = (0..num_peers).map(|i| {
            let (revision, text) = server.open_document();
            Peer {
                service: CollabService::new(format!("editor{i}").as_str(), revision, &text, options.clone()),
                inbox: VecDeque::new(),
            }
        }).collect();
        Self { server, peers, outgoing: VecDeque::new(), stats: SimStats::default() }
    }

    fn random_edit(&mut self, idx: usize, rng: &mut SmallRng) -> anyhow::Result<()> {
        let service = &mut self.peers[idx].service;
        let len = service.view_len();
        if len == 0 || rng.gen_bool(if len < 200 { 0.6 } else { 0.4 }) {
            let pos = rng.gen_range(0..=len);
            let content: String = (0..rng.gen_range(1..6))
                .map(|_| rng.sample(rand::distributions::Alphanumeric) as char)
                .collect();
            service.insert(pos, &content)?;
        } else {
            let pos = rng.gen_range(0..len);
            let span = rng.gen_range(1..=usize::min(8, len - pos));
            service.delete(pos..pos + span)?;
        }
        self.stats.typing += 1;
        Ok(())
    }

    fn undo_or_redo(&mut self, idx: usize, rng: &mut SmallRng) -> anyhow::Result<()> {
        let service = &mut self.peers[idx].service;
        let redo = rng.gen_bool(0.3);
        let result = if redo { service.redo() } else { service.undo() };
        match result {
            Ok(()) => {
                if redo { self.stats.redos += 1 } else { self.stats.undos += 1 }
            }
            Err(CollabError::NoHistoryAvailable) if !redo => {
                // Page in older history like an editor would. The next undo can use it.
                match service.fetch_older_records(&mut self.server) {
                    Ok(0) => {}
                    Ok(_) => self.stats.pages_fetched += 1,
                    // The cache was trimmed since the request went out.
                    Err(CollabError::HistoryGap { .. }) => {}
                    Err(e) => return Err(e.into()),
                }
            }
            Err(CollabError::NoHistoryAvailable) => {}
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    fn submit(&mut self, idx: usize) {
        if let Some(submission) = self.peers[idx].service.submit_changes() {
            self.stats.submissions += 1;
            self.outgoing.push_back((idx, submission));
        }
    }

    fn server_step(&mut self) -> anyhow::Result<bool> {
        let Some((idx, submission)) = self.outgoing.pop_front() else { return Ok(false) };
        let author = self.peers[idx].service.user().clone();
        match self.server.submit(&author, submission)? {
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
                self.stats.rejections += 1;
                self.peers[idx].inbox.push_back(Message::Rejected(missed));
            }
        }
        Ok(true)
    }

    fn deliver(&mut self, idx: usize) -> anyhow::Result<bool> {
        let peer = &mut self.peers[idx];
        let Some(msg) = peer.inbox.pop_front() else { return Ok(false) };
        let result = match msg {
            Message::Ack(record) => peer.service.submitted_changes_acknowledged(record),
            Message::Remote(record) => peer.service.handle_external_change(record),
            Message::Rejected(missed) => peer.service.submission_rejected(missed),
        };

        match result {
            Ok(()) => {}
            Err(e) if e.requires_resync() => {
                debug!(peer = idx, "resynchronizing: {e}");
                self.stats.resyncs += 1;
                let (revision, text) = self.server.open_document();
                // Anything still queued for this peer is covered by the fresh text.
                peer.inbox.clear();
                peer.service.resynchronize(revision, &text)?;
            }
            Err(e) => return Err(e.into()),
        }
        Ok(true)
    }

    fn settle(&mut self) -> anyhow::Result<()> {
        for _ in 0..10_000 {
            let mut progress = false;
            for i in 0..self.peers.len() {
                while self.deliver(i)? { progress = true; }
                if self.peers[i].service.sync_state() == SyncState::PendingLocal {
                    self.submit(i);
                }
            }
            while self.server_step()? { progress = true; }
            if !progress { return Ok(()); }
        }
        bail!("simulation didn't settle")
    }

    fn check_converged(&self) -> anyhow::Result<()> {
        let expected = self.server.text();
        for (i, peer) in self.peers.iter().enumerate() {
            if peer.service.view_text() != expected {
                bail!("editor {i} diverged from the server at revision {}", self.server.head_revision());
            }
            if peer.service.sync_state() != SyncState::Synced {
                bail!("editor {i} still has unsent changes");
            }
        }
        Ok(())
    }
}

fn simulate(num_peers: usize, steps: usize, seed: u64, text: &str, options: CollabOptions) -> anyhow::Result<Sim> {
    if num_peers == 0 { bail!("need at least one editor"); }
    let mut rng = SmallRng::seed_from_u64(seed);
    let mut sim = Sim::new(text, num_peers, &options);
    sim.stats.seed = seed;
    sim.stats.peers = num_peers;
    sim.stats.steps = steps;

    for _ in 0..steps {
        let idx = rng.gen_range(0..num_peers);
        match rng.gen_range(0..10) {
            0..=3 => sim.random_edit(idx, &mut rng)?,
            4 => sim.submit(idx),
            5 | 6 => { sim.server_step()?; }
            7 | 8 => { sim.deliver(idx)?; }
            _ => sim.undo_or_redo(idx, &mut rng)?,
        }
    }

    sim.settle()?;
    sim.check_converged()?;
    sim.stats.final_revision = sim.server.head_revision();
    sim.stats.final_len = sim.peers[0].service.view_len();
    info!(seed, revision = sim.stats.final_revision, "editors converged");
    Ok(sim)
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Simulate { peers, steps, seed, text, max_cached_records, save_snapshot } => {
            let seed = seed.unwrap_or_else(|| rand::thread_rng().gen());
            let mut options = CollabOptions::default();
            if let Some(max) = max_cached_records {
                options = options.with_max_cached_records(max);
            }

            let sim = simulate(peers, steps, seed, &text, options)
                .with_context(|| format!("simulation failed with seed {seed}"))?;

            if let Some(path) = save_snapshot {
                fs::write(&path, sim.peers[0].service.snapshot().encode())
                    .with_context(|| format!("couldn't write {}", path.display()))?;
            }
            print_json(&sim.stats, true)?;
        }

        Commands::Apply { text, changeset } => {
            let changeset = parse_changeset(&changeset)?;
            println!("{}", changeset.apply(&text)?);
        }

        Commands::Transform { a, b } => {
            let a = parse_changeset(&a)?;
            let b = parse_changeset(&b)?;
            if a.source_len() != b.source_len() {
                return Err(anyhow!("changesets apply to different lengths ({} and {})", a.source_len(), b.source_len()));
            }
            let out = TransformOutput {
                a_prime: a.transform(&b, Side::Left)?,
                b_prime: b.transform(&a, Side::Right)?,
            };
            print_json(&out, false)?;
        }

        Commands::Inspect { filename, pretty } => {
            let bytes = fs::read(&filename)
                .with_context(|| format!("couldn't read {}", filename.display()))?;
            let snapshot = CollabSnapshot::decode(&bytes)?;
            print_json(&snapshot, pretty)?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn simulation_converges() {
        for seed in 0..5 {
            let sim = simulate(3, 300, seed, "hi", CollabOptions::default()).unwrap();
            assert_eq!(sim.stats.final_revision, sim.server.head_revision());
        }
    }

    #[test]
    fn simulation_with_small_history_pages_records() {
        let options = CollabOptions::default().with_max_cached_records(3);
        simulate(2, 400, 7, "", options).unwrap();
    }

    #[test]
    fn cli_parses() {
        let cli = Cli::try_parse_from(["collab-sim", "simulate", "-p", "4", "--seed", "3"]).unwrap();
        assert!(matches!(cli.command, Commands::Simulate { peers: 4, seed: Some(3), .. }));
    }
}
