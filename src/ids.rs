use rand::Rng;

/// Visually unambiguous alphabet used for room and peer identifiers
/// (no I, O, 0 or 1).
const ID_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

pub fn generate_id(length: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..length)
        .map(|_| ID_ALPHABET[rng.gen_range(0..ID_ALPHABET.len())] as char)
        .collect()
}

/// Short human-typable room code.
pub fn room_id() -> String {
    generate_id(6)
}

/// Per-join peer identity, regenerated on every (re)join.
pub fn peer_id() -> String {
    generate_id(10)
}
