//! Ordered receive-side chunk accumulator.
//!
//! The transport delivers stream data as already-ordered chunks; the
//! assembler buffers them until the application drains the bytes with a
//! read. Capacity is bounded: when an event offers more bytes than fit,
//! the assembler takes a prefix and reports the short count, which the
//! caller uses to pause further transport delivery until reads free up
//! space (the receive window).

use std::collections::VecDeque;
use std::sync::Mutex;

use bytes::{Buf, Bytes};

struct AssemblerInner {
    chunks: VecDeque<Bytes>,
    buffered: usize,
    is_final: bool,
}

/// FIFO byte-chunk buffer between transport receive events and reads.
///
/// Interior mutability is required because the transport's callback
/// appends while an application task drains; the mutex is narrow and
/// never held across a suspension point.
pub struct ReceiveAssembler {
    inner: Mutex<AssemblerInner>,
    capacity: usize,
}

impl ReceiveAssembler {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(AssemblerInner {
                chunks: VecDeque::new(),
                buffered: 0,
                is_final: false,
            }),
            capacity,
        }
    }

    /// Append as much of the offered data as capacity allows, in order,
    /// slicing across chunk boundaries. Returns the number of bytes
    /// accepted; a short count means delivery must pause.
    ///
    /// `fin` latches the end-of-stream flag only when every offered byte
    /// was accepted, since the transport re-offers the rejected tail (and
    /// the flag) once delivery resumes.
    pub fn copy_from(&self, chunks: &[Bytes], total_offered: usize, fin: bool) -> usize {
        let mut inner = self.inner.lock().unwrap();
        if inner.is_final {
            return 0;
        }

        let room = self.capacity.saturating_sub(inner.buffered);
        let budget = room.min(total_offered);
        let mut remaining = budget;
        for chunk in chunks {
            if remaining == 0 {
                break;
            }
            let take = remaining.min(chunk.len());
            if take > 0 {
                inner.chunks.push_back(chunk.slice(..take));
                remaining -= take;
            }
        }

        let accepted = budget - remaining;
        inner.buffered += accepted;
        if fin && accepted == total_offered {
            inner.is_final = true;
        }
        accepted
    }

    /// Drain buffered bytes into `dest` in arrival order.
    ///
    /// Returns `(copied, empty_after, complete)`; `complete` is true once
    /// the stream is final and fully drained, including when nothing was
    /// copied. Reads past end of stream keep returning `(0, true, true)`.
    pub fn copy_to(&self, dest: &mut [u8]) -> (usize, bool, bool) {
        let mut inner = self.inner.lock().unwrap();

        let mut copied = 0;
        while copied < dest.len() {
            let consumed = {
                let Some(front) = inner.chunks.front_mut() else {
                    break;
                };
                let take = (dest.len() - copied).min(front.len());
                dest[copied..copied + take].copy_from_slice(&front[..take]);
                copied += take;
                if take == front.len() {
                    true
                } else {
                    front.advance(take);
                    false
                }
            };
            if consumed {
                inner.chunks.pop_front();
            }
        }
        inner.buffered -= copied;

        let empty = inner.chunks.is_empty();
        let complete = inner.is_final && empty;
        (copied, empty, complete)
    }

    /// Mark that no more data will arrive. Already-buffered bytes are kept.
    pub fn set_final(&self) {
        self.inner.lock().unwrap().is_final = true;
    }

    /// Whether another delivery can be accepted right now.
    pub fn has_capacity(&self) -> bool {
        self.inner.lock().unwrap().buffered < self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offer(assembler: &ReceiveAssembler, data: &[u8], fin: bool) -> usize {
        assembler.copy_from(&[Bytes::copy_from_slice(data)], data.len(), fin)
    }

    #[test]
    fn preserves_byte_order_across_chunk_boundaries() {
        let assembler = ReceiveAssembler::new(1024);
        assert_eq!(offer(&assembler, b"hel", false), 3);
        assert_eq!(offer(&assembler, b"lo ", false), 3);
        assert_eq!(offer(&assembler, b"world", false), 5);

        let mut dest = [0u8; 4];
        let (copied, empty, complete) = assembler.copy_to(&mut dest);
        assert_eq!((copied, empty, complete), (4, false, false));
        assert_eq!(&dest, b"hell");

        let mut rest = [0u8; 16];
        let (copied, empty, _) = assembler.copy_to(&mut rest);
        assert_eq!(copied, 7);
        assert!(empty);
        assert_eq!(&rest[..7], b"o world");
    }

    #[test]
    fn short_accepts_when_capacity_exhausted() {
        let assembler = ReceiveAssembler::new(8);
        assert_eq!(offer(&assembler, b"0123456789", false), 8);
        assert!(!assembler.has_capacity());

        // Nothing fits until a read drains the buffer.
        assert_eq!(offer(&assembler, b"ab", false), 0);

        let mut dest = [0u8; 8];
        assert_eq!(assembler.copy_to(&mut dest).0, 8);
        assert!(assembler.has_capacity());
        assert_eq!(offer(&assembler, b"89", false), 2);
    }

    #[test]
    fn fin_latches_only_on_full_acceptance() {
        let assembler = ReceiveAssembler::new(4);
        assert_eq!(offer(&assembler, b"abcdef", true), 4);

        let mut dest = [0u8; 4];
        let (_, _, complete) = assembler.copy_to(&mut dest);
        assert!(!complete, "fin must not latch on a short accept");

        // Redelivery of the tail with fin completes the stream.
        assert_eq!(offer(&assembler, b"ef", true), 2);
        let (copied, _, complete) = assembler.copy_to(&mut dest);
        assert_eq!(copied, 2);
        assert!(complete);
    }

    #[test]
    fn eof_drain_is_idempotent() {
        let assembler = ReceiveAssembler::new(64);
        offer(&assembler, b"bye", true);

        let mut dest = [0u8; 8];
        assert_eq!(assembler.copy_to(&mut dest), (3, true, true));
        for _ in 0..10 {
            assert_eq!(assembler.copy_to(&mut dest), (0, true, true));
        }
        // No chunk appended after the final flag.
        assert_eq!(offer(&assembler, b"late", false), 0);
    }

    #[test]
    fn set_final_keeps_buffered_bytes() {
        let assembler = ReceiveAssembler::new(64);
        offer(&assembler, b"tail", false);
        assembler.set_final();

        let mut dest = [0u8; 8];
        assert_eq!(assembler.copy_to(&mut dest), (4, true, true));
        assert_eq!(&dest[..4], b"tail");
    }
}
