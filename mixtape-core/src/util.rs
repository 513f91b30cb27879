use rand::{distributions::Alphanumeric, thread_rng, Rng};

/// The length of group invite codes.
pub const INVITE_CODE_LENGTH: usize = 8;

pub fn random_string(length: usize) -> String {
    let mut rng = thread_rng();

    std::iter::repeat(())
        .map(|_| rng.sample(Alphanumeric) as char)
        .take(length)
        .collect()
}

/// Generates the alphanumeric code users share to join a group.
pub fn invite_code() -> String {
    random_string(INVITE_CODE_LENGTH)
}
