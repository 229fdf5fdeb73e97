pub mod duration;
pub mod gamertag;

pub use duration::{iso8601_whole_seconds, parse_iso8601_seconds, statistical_mode};
pub use gamertag::{encode_gamertag_for_api, seo_gamertag, GamertagKey};
