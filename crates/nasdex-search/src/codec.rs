//! Unsigned varints and delta-encoded postings lists.
//!
//! A postings list is a uvarint document count followed by that many uvarint
//! gaps between ascending, unique document ids (the first gap is from zero).

use itertools::Itertools;

/// Longest uvarint encoding of a `u64`.
const MAX_UVARINT_LEN: usize = 10;

/// Append `value` as an LEB128 unsigned varint.
pub fn write_uvarint(out: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        out.push((value as u8 & 0x7F) | 0x80);
        value >>= 7;
    }
    out.push(value as u8);
}

/// Read one uvarint at `*offset`, advancing it.
///
/// Returns `None` on truncation or an over-long encoding.
pub fn read_uvarint(buf: &[u8], offset: &mut usize) -> Option<u64> {
    let mut value = 0u64;
    for i in 0..MAX_UVARINT_LEN {
        let byte = *buf.get(*offset)?;
        *offset += 1;
        let chunk = u64::from(byte & 0x7F);
        if i == MAX_UVARINT_LEN - 1 && chunk > 1 {
            return None;
        }
        value |= chunk << (7 * i);
        if byte & 0x80 == 0 {
            return Some(value);
        }
    }
    None
}

/// Encode ascending, unique document ids.
pub fn encode_postings(docs: &[u64]) -> Vec<u8> {
    let mut out = Vec::with_capacity(docs.len() * 4 + 2);
    write_uvarint(&mut out, docs.len() as u64);
    let mut previous = 0u64;
    for &doc in docs {
        write_uvarint(&mut out, doc - previous);
        previous = doc;
    }
    out
}

/// Decode a postings list, keeping at most `cap` ids when given.
///
/// Returns `None` if the buffer is truncated or the ids would overflow.
pub fn decode_postings(buf: &[u8], cap: Option<usize>) -> Option<Vec<u64>> {
    let mut offset = 0;
    let count = usize::try_from(read_uvarint(buf, &mut offset)?).ok()?;
    let keep = cap.map_or(count, |cap| cap.min(count));
    // Every id takes at least one byte; reject counts the buffer cannot hold.
    if keep > buf.len().saturating_sub(offset) {
        return None;
    }

    let mut docs = Vec::with_capacity(keep);
    let mut current = 0u64;
    for _ in 0..keep {
        let gap = read_uvarint(buf, &mut offset)?;
        current = current.checked_add(gap)?;
        docs.push(current);
    }
    Some(docs)
}

/// Sorted-merge intersection of two ascending lists.
pub fn intersect(a: &[u64], b: &[u64]) -> Vec<u64> {
    let mut i = 0;
    let mut j = 0;
    let mut out = Vec::with_capacity(a.len().min(b.len()));
    while i < a.len() && j < b.len() {
        if a[i] == b[j] {
            out.push(a[i]);
            i += 1;
            j += 1;
        } else if a[i] < b[j] {
            i += 1;
        } else {
            j += 1;
        }
    }
    out
}

/// Sorted-merge union of two ascending lists, without duplicates.
pub fn union(a: &[u64], b: &[u64]) -> Vec<u64> {
    a.iter().merge(b.iter()).dedup().copied().collect()
}

/// Intersect many lists, smallest first so the working set only shrinks.
pub fn intersect_all(mut lists: Vec<Vec<u64>>) -> Vec<u64> {
    if lists.is_empty() {
        return Vec::new();
    }
    lists.sort_by_key(Vec::len);
    let mut lists = lists.into_iter();
    let mut acc = lists.next().unwrap_or_default();
    for list in lists {
        if acc.is_empty() {
            break;
        }
        acc = intersect(&acc, &list);
    }
    acc
}

/// Union many lists.
pub fn union_all(lists: impl IntoIterator<Item = Vec<u64>>) -> Vec<u64> {
    lists
        .into_iter()
        .kmerge()
        .dedup()
        .collect()
}

/// Ids present in at least `min` of the given unique lists.
pub fn union_at_least(lists: impl IntoIterator<Item = Vec<u64>>, min: usize) -> Vec<u64> {
    lists
        .into_iter()
        .kmerge()
        .dedup_with_count()
        .filter(|(count, _)| *count >= min)
        .map(|(_, doc)| doc)
        .collect()
}

/// Ids of `a` that are not in `b`.
pub fn difference(a: &[u64], b: &[u64]) -> Vec<u64> {
    let mut j = 0;
    let mut out = Vec::with_capacity(a.len());
    for &doc in a {
        while j < b.len() && b[j] < doc {
            j += 1;
        }
        if j >= b.len() || b[j] != doc {
            out.push(doc);
        }
    }
    out
}
