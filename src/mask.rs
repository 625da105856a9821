/// Mask/unmask a chunk of a frame payload.
///
/// `offset` is the position of `buf` within the frame payload, so that a payload received in
/// several pieces is unmasked as if it had arrived at once. Returns the offset of the byte that
/// follows `buf`.
#[inline]
pub fn apply_mask(buf: &mut [u8], mask: [u8; 4], offset: usize) -> usize {
    let mask = rotate(mask, offset);

    let mut words = buf.chunks_exact_mut(4);
    for word in &mut words {
        word[0] ^= mask[0];
        word[1] ^= mask[1];
        word[2] ^= mask[2];
        word[3] ^= mask[3];
    }
    apply_mask_fallback(words.into_remainder(), mask);

    offset.wrapping_add(buf.len())
}

/// A bytewise mask application.
#[inline]
fn apply_mask_fallback(buf: &mut [u8], mask: [u8; 4]) {
    for (i, byte) in buf.iter_mut().enumerate() {
        *byte ^= mask[i & 3];
    }
}

/// Rotates the mask so that index 0 lines up with `offset` in the payload.
#[inline]
fn rotate(mask: [u8; 4], offset: usize) -> [u8; 4] {
    let shift = offset & 3;
    [
        mask[shift],
        mask[(shift + 1) & 3],
        mask[(shift + 2) & 3],
        mask[(shift + 3) & 3],
    ]
}
