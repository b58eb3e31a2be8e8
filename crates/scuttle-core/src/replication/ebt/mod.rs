//! Epidemic Broadcast Trees
//!
//! Both peers announce, per feed, how far they are and whether they want
//! to receive it. Each side then pushes what the other is missing, and keeps
//! pushing new messages for as long as the session lives.
//!
//! ```text
//!  local                                  remote
//!    │──── notes {F: 16} ──────────────────▶│  "I have F up to 7, send from 8"
//!    │◀─── notes {F: 22} ───────────────────│  "I have F up to 10, send from 11"
//!    │◀─── msg F#8, F#9, F#10 ──────────────│  streamer for F
//!    │◀─── msg F#11 (live) ─────────────────│
//! ```

mod notes;
mod session;
mod streamer;

pub use notes::{Note, Notes};
pub use session::EbtSession;
pub use streamer::MessageStreamer;

use crate::error::ReplicationResult;
use crate::feed::Sequence;
use crate::pipeline::MessageBuffer;
use crate::wants::WantedFeeds;

/// Notes asking for every wanted feed from the first sequence not known
/// locally.
pub fn local_notes(wants: &WantedFeeds, buffer: &MessageBuffer) -> ReplicationResult<Notes> {
    let mut notes = Notes::new();
    for wanted in wants.feeds() {
        let from = buffer.known_sequence(&wanted.feed)?.map(Sequence::next);
        notes.insert(wanted.feed, Note::wanting(from));
    }
    Ok(notes)
}
