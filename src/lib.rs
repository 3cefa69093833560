//! The client core for collaboratively editing plain text with operational transform.
//!
//! Edits are expressed as [`Changeset`]s: a walk over a document which retains, deletes and
//! inserts characters. The server keeps a linear list of accepted changesets (records), and each
//! client runs a [`CollabService`] which merges its own edits with everyone else's.
//!
//! The service tracks four versions of the document:
//!
//! - The *server* text, at the last revision we've seen.
//! - A *submitted* changeset which has been sent to the server but not acknowledged yet.
//! - A *local* changeset with edits the user made since then.
//! - The *view*, which is what the user sees. Its always local(submitted(server)).
//!
//! Records made by other users are transformed past submitted and local changes before they're
//! applied to the view. Undo works on the user's own records only, even after other people have
//! edited the document since.
//!
//! ## Example
//!
//! ```
//! use collab_ot::*;
//!
//! let mut server = MemoryServer::new("hello");
//! let mut alice = CollabService::new("alice", 0, "hello", CollabOptions::default());
//!
//! alice.insert(5, " world").unwrap();
//! let submission = alice.submit_changes().unwrap();
//!
//! match server.submit(alice.user(), submission).unwrap() {
//!     SubmitResult::Accepted(record) => alice.submitted_changes_acknowledged(record).unwrap(),
//!     SubmitResult::Rejected { .. } => unreachable!(),
//! }
//! assert_eq!(alice.server_text(), "hello world");
//!
//! // Undo works even after other people edit the document.
//! let mut bob = CollabService::new("bob", 1, server.text(), CollabOptions::default());
//! bob.insert(0, "> ").unwrap();
//! let submission = bob.submit_changes().unwrap();
//! if let SubmitResult::Accepted(record) = server.submit(bob.user(), submission).unwrap() {
//!     alice.handle_external_change(record).unwrap();
//! }
//!
//! alice.undo().unwrap();
//! assert_eq!(alice.view_text(), "> hello");
//! ```

pub mod changeset;
pub mod selection;
pub mod history;
pub mod records;
pub mod service;
pub mod event;
pub mod options;
pub mod encoding;
pub mod registry;
pub mod memory_server;
pub mod unicount;
mod error;

#[cfg(test)]
mod fuzzer_tools;

use smartstring::alias::String as SmartString;

/// Server revisions count accepted records. Revision 0 is the empty history, and record `n`
/// takes the document from revision `n - 1` to `n`.
pub type Revision = u64;

pub type UserId = SmartString;

pub use changeset::{Changeset, Op, Side};
pub use encoding::{CollabSnapshot, ParseError};
pub use error::CollabError;
pub use event::{CollabEvent, Subscription};
pub use history::{EntryOrigin, History, HistoryEntry};
pub use memory_server::{MemoryServer, SubmitResult};
pub use options::CollabOptions;
pub use records::{FetchRequest, RecordSource, RecordsPage, ServerRecord, UserRecords};
pub use registry::{DocumentId, DocumentSet};
pub use selection::{SelectionId, SelectionRange};
pub use service::{CollabService, ResyncOutcome, Submission, SyncState};
