//! Mark-and-Sweep Collection
//!
//! Marking is non-recursive Deutsch–Schorr–Waite pointer reversal: the
//! return path through the pair graph is threaded through the very slots
//! being traversed, so marking needs no auxiliary stack and cannot
//! allocate.
//!
//! ## Per-cell protocol
//!
//! Each slot word carries its own mark bit. On the *first* slot it means
//! "cell visited"; on the *rest* slot it means "descent has swung from
//! first to rest". A visited-but-unfinished cell holds the back-link to
//! its parent in exactly one slot:
//!
//! ```text
//! descend   first ← back-link          (visit mark set)
//! swing     first ← finished value,    rest ← back-link   (swing mark set)
//! retreat   rest  ← finished value,    cell fully restored
//! ```
//!
//! The traversal variable `prev` is always the exact word by which the
//! current cell was entered (kind bits included), so restoring a parent
//! slot reproduces the original word bit for bit, so header hints on
//! *rest* slots survive collection untouched. Every pair is handled at most
//! three times.
//!
//! Data blocks carry a single mark bit in their header and contain no
//! outgoing references; immediates and nil terminate descent.
//!
//! ## Sweep
//!
//! The pair region is swept linearly: unmarked cells go back on the free
//! list with `first` = nil, marked cells have both mark bits cleared. The
//! block region is swept with free-run coalescing; a run longer than the
//! size-field cap is split into multiple free entries.

use crate::heap::{Heap, MAX_BLOCK_WORDS, MIN_BLOCK_BYTES, WORD_BYTES};
use crate::stacks::Roots;
use crate::value::{
    Value, INDEX_LIMIT, INDEX_SHIFT, KIND_IMM, KIND_MASK, KIND_SHIFT, MARK_BIT, REGION_BIT,
};

/// Run a full collection: mark everything reachable from `roots`, then
/// sweep both regions. Never allocates.
pub fn collect(heap: &mut Heap, roots: Roots<'_>) {
    for v in roots.regs.all() {
        mark_from(heap, v);
    }
    for v in roots.stack.live() {
        mark_from(heap, *v);
    }

    let pairs_freed = sweep_pairs(heap);
    let block_bytes_freed = sweep_blocks(heap);

    heap.stats.collections += 1;
    heap.stats.last_pairs_freed = pairs_freed;
    heap.stats.last_block_bytes_freed = block_bytes_freed;
    tracing::debug!(
        collections = heap.stats.collections,
        pairs_freed,
        block_bytes_freed,
        "garbage collection complete"
    );
}

/// What a slot word leads to, bounds-checked against the live regions.
enum Target {
    Terminal,
    Pair(usize),
    Block(usize),
}

fn target(heap: &Heap, word: u32) -> Target {
    let w = word & !MARK_BIT;
    if (w & KIND_MASK) >> KIND_SHIFT == KIND_IMM {
        return Target::Terminal;
    }
    let index = w >> INDEX_SHIFT;
    if index == INDEX_LIMIT {
        return Target::Terminal;
    }
    if w & REGION_BIT != 0 {
        let off = index as usize * 4;
        if off + 4 <= heap.block_bump {
            Target::Block(off)
        } else {
            Target::Terminal
        }
    } else if index < heap.pair_bump {
        Target::Pair(index as usize)
    } else {
        Target::Terminal
    }
}

fn mark_from(heap: &mut Heap, root: Value) {
    let nil = Value::NIL.raw();
    let mut cur: u32 = root.raw();
    let mut prev: u32 = nil;

    loop {
        // Descend as deep as `first` chains allow.
        loop {
            match target(heap, cur) {
                Target::Block(off) => {
                    heap.block_set_mark(off);
                    break;
                }
                Target::Pair(p) if heap.pairs[p].first & MARK_BIT == 0 => {
                    let old_first = heap.pairs[p].first;
                    heap.pairs[p].first = prev | MARK_BIT;
                    prev = cur;
                    cur = old_first;
                }
                _ => break, // nil, immediate, or an already visited pair
            }
        }

        // Climb back up until a cell still has its rest slot pending.
        loop {
            if prev == nil {
                return;
            }
            let p = (prev >> INDEX_SHIFT) as usize;
            if heap.pairs[p].rest & MARK_BIT == 0 {
                // Swing: restore first, move the back-link to rest.
                let back = heap.pairs[p].first & !MARK_BIT;
                let old_rest = heap.pairs[p].rest;
                heap.pairs[p].first = cur | MARK_BIT;
                heap.pairs[p].rest = back | MARK_BIT;
                cur = old_rest;
                break;
            } else {
                // Retreat: restore rest, step to the parent.
                let back = heap.pairs[p].rest & !MARK_BIT;
                heap.pairs[p].rest = cur | MARK_BIT;
                cur = prev;
                prev = back;
            }
        }
    }
}

fn sweep_pairs(heap: &mut Heap) -> usize {
    heap.reset_pair_free_list();
    let mut freed = 0;
    for i in 0..heap.pair_bump {
        let idx = i as usize;
        if heap.pairs[idx].first & MARK_BIT != 0 {
            heap.pairs[idx].first &= !MARK_BIT;
            heap.pairs[idx].rest &= !MARK_BIT;
        } else {
            heap.free_pair(i);
            freed += 1;
        }
    }
    freed
}

fn sweep_blocks(heap: &mut Heap) -> usize {
    heap.reset_block_free_list();
    let mut freed = 0;
    let mut off = 0;
    while off < heap.block_bump {
        let size = heap.word(off) as usize * WORD_BYTES;
        debug_assert!(size >= MIN_BLOCK_BYTES, "corrupt block header");
        if heap.block_marked(off) {
            heap.block_clear_mark(off);
            off += size;
            continue;
        }
        // Coalesce the whole unmarked run into as few free entries as the
        // size-field cap allows.
        let start = off;
        while off < heap.block_bump && !heap.block_marked(off) {
            off += heap.word(off) as usize * WORD_BYTES;
        }
        let run = off - start;
        freed += run;
        let mut entry = start;
        let mut remaining = run;
        while remaining > 0 {
            let mut chunk = remaining.min(MAX_BLOCK_WORDS * WORD_BYTES);
            let tail = remaining - chunk;
            if tail > 0 && tail < MIN_BLOCK_BYTES {
                chunk = remaining - MIN_BLOCK_BYTES;
            }
            heap.push_free_block(entry, chunk);
            entry += chunk;
            remaining -= chunk;
        }
    }
    freed
}

// =============================================================================
// Tests
// =============================================================================
