pub mod models;
pub mod traits;
pub mod ytdlp;

pub use models::{Listing, VideoDescriptor};
pub use traits::PlaylistLister;
pub use ytdlp::{find_ytdlp, YtDlpExtractor};
