//! One adapter per supported platform.

mod facebook;
mod instagram;
mod linkedin;
mod tiktok;
mod twitter;
mod youtube;

pub use facebook::FacebookAdapter;
pub use instagram::InstagramAdapter;
pub use linkedin::LinkedinAdapter;
pub use tiktok::TiktokAdapter;
pub use twitter::TwitterAdapter;
pub use youtube::YoutubeAdapter;
