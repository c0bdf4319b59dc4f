pub mod music;

use crate::{Data, Error};

/// Every command the bot registers.
#[must_use]
pub fn all() -> Vec<poise::Command<Data, Error>> {
    vec![
        music::join(),
        music::leave(),
        music::play(),
        music::pause(),
        music::resume(),
        music::skip(),
        music::stop(),
        music::volume(),
        music::loop_mode(),
        music::queue(),
        music::controls(),
    ]
}
