/// Generate a random frame mask.
///
/// `rand::random` draws from the thread-local CSPRNG, which is what the
/// protocol requires for masking keys.
#[inline]
pub fn generate_mask() -> [u8; 4] {
    rand::random()
}

/// Mask/unmask a frame payload in place.
///
/// XOR is an involution, so the same call both masks and unmasks.
#[inline]
pub fn apply_mask(buf: &mut [u8], mask: [u8; 4]) {
    let mask_word = u32::from_ne_bytes(mask);
    let mut chunks = buf.chunks_exact_mut(4);
    for chunk in &mut chunks {
        let word = u32::from_ne_bytes(chunk.try_into().expect("4-byte chunk"));
        chunk.copy_from_slice(&(word ^ mask_word).to_ne_bytes());
    }
    // Tail shorter than one word.
    for (i, byte) in chunks.into_remainder().iter_mut().enumerate() {
        *byte ^= mask[i & 3];
    }
}

#[cfg(test)]
mod tests {
    use super::apply_mask;

    fn apply_mask_bytewise(buf: &mut [u8], mask: [u8; 4]) {
        for (i, byte) in buf.iter_mut().enumerate() {
            *byte ^= mask[i & 3];
        }
    }

    #[test]
    fn matches_bytewise_reference() {
        let mask = [0x6d, 0xb6, 0xb2, 0x80];
        let unmasked = vec![0xf3, 0x00, 0x01, 0x02, 0x03, 0x80, 0x81, 0x82, 0xff, 0xfe, 0x00];

        for start in 0..4 {
            let mut masked = unmasked.clone();
            apply_mask(&mut masked[start..], mask);

            let mut expected = unmasked.clone();
            apply_mask_bytewise(&mut expected[start..], mask);

            assert_eq!(masked, expected);
        }
    }

    #[test]
    fn involution() {
        let mask = [0x11, 0x22, 0x33, 0x44];
        let original: Vec<u8> = (0..=255).collect();
        let mut buf = original.clone();
        apply_mask(&mut buf, mask);
        assert_ne!(buf, original);
        apply_mask(&mut buf, mask);
        assert_eq!(buf, original);
    }

    #[test]
    fn empty_and_short() {
        let mask = [1, 2, 3, 4];
        let mut empty: [u8; 0] = [];
        apply_mask(&mut empty, mask);

        let mut short = [0xffu8; 3];
        apply_mask(&mut short, mask);
        assert_eq!(short, [0xfe, 0xfd, 0xfc]);
    }
}
