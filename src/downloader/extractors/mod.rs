// Metadata extraction - item lookup and collection resolution
//
// The pipeline only sees the `MetadataSource` trait. The yt-dlp binary is the
// one implementation; diagnostics turn its stderr into readable reasons.

mod cli;
mod diagnostics;

pub use cli::{names_collection, parse_collection, parse_item, YtDlpExtractor};
pub use diagnostics::{diagnose_error, BlockingReason};
