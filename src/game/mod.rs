pub mod beatmap;
pub mod gameplay;
pub mod judgment;
pub mod lanes;
pub mod note;
pub mod scores;
pub mod timing;
