//! Textual save/restore of an `ElementMap` graph (component C6), plus
//! identity deduplication across the whole graph (component C7's
//! companion). Line-oriented, whitespace-tokenized, ASCII, the way
//! `nanoda::serial_parser::SLineParser` reads its own export format —
//! a cursor over `str::lines()`/`str::split_whitespace()`, no external
//! parser-combinator crate.

use std::cell::RefCell;
use std::collections::HashMap;
use std::io::Write;
use std::rc::Rc;

use crate::element_map::{ChildElementGroup, ElementMap, MappedNameRef};
use crate::errors::{ElementMapError, ElementMapResult};
use crate::indexed_name::IndexedName;
use crate::mapped_name::MappedName;
use crate::registry;
use crate::string_hasher::StringId;

const RESTORE_HASHER_TAG: u64 = 0;

fn pool_index(pool: &mut Vec<String>, index: &mut HashMap<String, usize>, s: &str) -> usize {
    if let Some(&i) = index.get(s) {
        return i;
    }
    let i = pool.len();
    pool.push(s.to_owned());
    index.insert(s.to_owned(), i);
    i
}

/// Post-order DFS: a map is pushed onto `order` only once, the first time
/// it's reached, via the save-id registry's dedup (children of a shared
/// sub-graph are visited from whichever parent gets there first).
fn collect_order(root: &Rc<RefCell<ElementMap>>, order: &mut Vec<Rc<RefCell<ElementMap>>>) {
    if registry::has_save_id(root) {
        return;
    }
    let borrowed = root.borrow();
    for type_tag in borrowed.type_tags() {
        for (_, group) in borrowed.child_groups(&type_tag) {
            if let Some(child) = &group.element_map {
                collect_order(child, order);
            }
        }
    }
    drop(borrowed);
    // Assign the save-id only now, after every child has one, so a child's
    // id is always smaller than its parents' and the restore path never
    // needs a forward reference.
    registry::save_id_for(root);
    order.push(Rc::clone(root));
}

/// Serialize the full graph reachable from `root` (children written before
/// the parents that reference them, so `mapIndex` never forward-references).
pub fn save(root: &Rc<RefCell<ElementMap>>, out: &mut impl Write) -> ElementMapResult<()> {
    registry::start_save();
    let mut order = Vec::new();
    collect_order(root, &mut order);
    for m in &order {
        let save_id = registry::save_id_for(m);
        m.borrow_mut().set_id(save_id);
    }

    let mut pool = vec![String::new()];
    let mut pool_idx_of: HashMap<String, usize> = HashMap::new();
    pool_idx_of.insert(String::new(), 0);
    for m in &order {
        let borrowed = m.borrow();
        for type_tag in borrowed.type_tags() {
            pool_index(&mut pool, &mut pool_idx_of, &type_tag);
            for chain in borrowed.name_chains(&type_tag) {
                for r in &chain {
                    pool_index(&mut pool, &mut pool_idx_of, r.name.postfix());
                }
            }
        }
    }

    writeln!(out, "{} PostfixCount {}", root.borrow().id(), pool.len())?;
    for p in &pool {
        writeln!(out, "{}", p)?;
    }
    writeln!(out)?;
    writeln!(out, "MapCount {}", order.len())?;

    for (i, m) in order.iter().enumerate() {
        let borrowed = m.borrow();
        let type_tags = borrowed.type_tags();
        writeln!(out)?;
        writeln!(out, "ElementMap {} {} {}", i + 1, borrowed.id(), type_tags.len())?;
        for type_tag in &type_tags {
            writeln!(out)?;
            writeln!(out, "{}", type_tag)?;
            let children = borrowed.child_groups(type_tag);
            writeln!(out)?;
            writeln!(out, "ChildCount {}", children.len())?;
            for (_, group) in &children {
                let map_index = match &group.element_map {
                    Some(child) => registry::save_id_for(child),
                    None => 0,
                };
                let sids: String = group.sids.iter().map(|s| format!(".{}", s.id())).collect();
                // The postfix field is prefixed with `;` so it's never an
                // empty whitespace-split token (most groups have no postfix
                // at all, and an empty token would shift every field after
                // it when read back with `split_whitespace`).
                writeln!(
                    out,
                    "{} {} {} {} {} ;{} 0{}",
                    group.indexed_name.index(),
                    group.offset,
                    group.count,
                    group.tag,
                    map_index,
                    group.postfix,
                    sids
                )?;
            }

            let chains = borrowed.name_chains(type_tag);
            writeln!(out)?;
            writeln!(out, "NameCount {}", chains.len())?;
            for chain in &chains {
                let mut tokens = Vec::new();
                for r in chain {
                    let namespec = encode_namespec(r, type_tag, &pool_idx_of);
                    let postfix_idx = *pool_idx_of.get(r.name.postfix()).unwrap_or(&0);
                    let sids: String = r.sids.iter().map(|s| format!(".{:x}", s.id())).collect();
                    tokens.push(format!("{}.{:x}{}", namespec, postfix_idx, sids));
                }
                tokens.push("0".to_owned());
                writeln!(out, "{}", tokens.join(" "))?;
            }
        }
        writeln!(out)?;
        writeln!(out, "EndMap")?;
    }
    registry::finish_save();
    Ok(())
}

/// A whole name-chain token is later split on `.` to recover its fields
/// (`decode_name_token`), so a literal mapped name containing a literal `.`
/// byte would be misparsed. Every literal produced by `MappedName`/`codec`
/// in this crate is built from tag/hash text that never contains `.`, so
/// this is a format limitation rather than a live bug, but it means this
/// save format can't round-trip an arbitrary caller-supplied literal name.
fn encode_namespec(r: &MappedNameRef, type_tag: &str, pool_idx_of: &HashMap<String, usize>) -> String {
    if let Some(idx) = r.name.to_indexed_name() {
        if idx.kind() == type_tag {
            if let Some(&p) = pool_idx_of.get(idx.kind()) {
                return format!(":{:x}.{:x}", p, idx.index());
            }
        }
    }
    // Only the data portion goes in the namespec: the postfix is written and
    // restored separately (via `postfix_idx`/`decode_name_token`), so
    // including it here would duplicate it on restore.
    if r.sids.iter().any(|s| s.is_marked()) {
        format!("${}", r.name.name())
    } else {
        format!(";{}", r.name.name())
    }
}

struct LineCursor<'a> {
    lines: std::str::Lines<'a>,
    line_num: usize,
}

impl<'a> LineCursor<'a> {
    fn new(s: &'a str) -> Self {
        LineCursor { lines: s.lines(), line_num: 0 }
    }

    fn next_line(&mut self) -> ElementMapResult<&'a str> {
        self.line_num += 1;
        self.lines.next().ok_or_else(|| ElementMapError::StreamFormat {
            line: self.line_num,
            detail: "unexpected end of stream".to_owned(),
        })
    }
}

fn parse_dec(s: &str, line: usize) -> ElementMapResult<i64> {
    s.parse::<i64>().map_err(|_| ElementMapError::StreamFormat { line, detail: format!("expected decimal integer, got {:?}", s) })
}

fn parse_hex(s: &str, line: usize) -> ElementMapResult<i64> {
    i64::from_str_radix(s, 16).map_err(|_| ElementMapError::StreamFormat { line, detail: format!("expected hex integer, got {:?}", s) })
}

/// Restore a full graph, returning the root (the last map block written).
pub fn restore(input: &str) -> ElementMapResult<Rc<RefCell<ElementMap>>> {
    registry::start_restore();
    let mut cur = LineCursor::new(input);

    let header = cur.next_line()?;
    let mut header_tokens = header.split_whitespace();
    let _id = header_tokens.next().ok_or_else(|| ElementMapError::StreamFormat { line: cur.line_num, detail: "missing id".into() })?;
    let keyword = header_tokens.next().ok_or_else(|| ElementMapError::StreamFormat { line: cur.line_num, detail: "missing PostfixCount".into() })?;
    if keyword != "PostfixCount" {
        return Err(ElementMapError::StreamFormat { line: cur.line_num, detail: format!("expected PostfixCount, got {:?}", keyword) });
    }
    let n_str = header_tokens.next().ok_or_else(|| ElementMapError::StreamFormat { line: cur.line_num, detail: "missing postfix count".into() })?;
    let n = parse_dec(n_str, cur.line_num)?;
    if n < 0 {
        return Err(ElementMapError::SemanticConsistency { line: cur.line_num, detail: "negative PostfixCount".into() });
    }

    let mut pool = Vec::with_capacity(n as usize);
    for _ in 0..n {
        pool.push(cur.next_line()?.to_owned());
    }

    let _blank = cur.next_line()?;
    let map_count_line = cur.next_line()?;
    let mut mc_tokens = map_count_line.split_whitespace();
    let kw = mc_tokens.next().ok_or_else(|| ElementMapError::StreamFormat { line: cur.line_num, detail: "missing MapCount".into() })?;
    if kw != "MapCount" {
        return Err(ElementMapError::StreamFormat { line: cur.line_num, detail: format!("expected MapCount, got {:?}", kw) });
    }
    let map_count = parse_dec(mc_tokens.next().ok_or_else(|| ElementMapError::StreamFormat { line: cur.line_num, detail: "missing map count".into() })?, cur.line_num)?;
    if map_count < 0 {
        return Err(ElementMapError::SemanticConsistency { line: cur.line_num, detail: "negative MapCount".into() });
    }

    let mut order: Vec<Rc<RefCell<ElementMap>>> = Vec::with_capacity(map_count as usize);
    for _ in 0..map_count {
        let restored = restore_one_map(&mut cur, &pool, &order)?;
        order.push(restored);
    }

    registry::finish_restore();
    order.pop().ok_or_else(|| ElementMapError::SemanticConsistency { line: cur.line_num, detail: "empty MapCount".into() })
}

fn restore_one_map(
    cur: &mut LineCursor,
    pool: &[String],
    order: &[Rc<RefCell<ElementMap>>],
) -> ElementMapResult<Rc<RefCell<ElementMap>>> {
    let _blank = cur.next_line()?;
    let header = cur.next_line()?;
    let mut tokens = header.split_whitespace();
    let kw = tokens.next().ok_or_else(|| ElementMapError::StreamFormat { line: cur.line_num, detail: "missing ElementMap".into() })?;
    if kw != "ElementMap" {
        return Err(ElementMapError::StreamFormat { line: cur.line_num, detail: format!("expected ElementMap, got {:?}", kw) });
    }
    let _index = parse_dec(tokens.next().ok_or_else(|| ElementMapError::StreamFormat { line: cur.line_num, detail: "missing index".into() })?, cur.line_num)?;
    let id = parse_dec(tokens.next().ok_or_else(|| ElementMapError::StreamFormat { line: cur.line_num, detail: "missing id".into() })?, cur.line_num)? as u64;
    let type_count = parse_dec(tokens.next().ok_or_else(|| ElementMapError::StreamFormat { line: cur.line_num, detail: "missing typeCount".into() })?, cur.line_num)?;
    if type_count < 0 {
        return Err(ElementMapError::SemanticConsistency { line: cur.line_num, detail: "negative typeCount".into() });
    }

    if let Some(existing) = registry::restored_by_id(id) {
        skip_until_end_map(cur)?;
        return Ok(existing);
    }

    let map = Rc::new(RefCell::new(ElementMap::new()));
    map.borrow_mut().set_id(id);
    registry::register_restored(id, Rc::clone(&map));

    let mut buckets: std::collections::BTreeMap<String, (Vec<Vec<MappedNameRef>>, Vec<(i64, ChildElementGroup)>)> = std::collections::BTreeMap::new();

    for _ in 0..type_count {
        let _blank = cur.next_line()?;
        let type_tag = cur.next_line()?.to_owned();

        let _blank = cur.next_line()?;
        let child_header = cur.next_line()?;
        let mut ch_tokens = child_header.split_whitespace();
        let kw = ch_tokens.next().ok_or_else(|| ElementMapError::StreamFormat { line: cur.line_num, detail: "missing ChildCount".into() })?;
        if kw != "ChildCount" {
            return Err(ElementMapError::StreamFormat { line: cur.line_num, detail: format!("expected ChildCount, got {:?}", kw) });
        }
        let child_count = parse_dec(ch_tokens.next().ok_or_else(|| ElementMapError::StreamFormat { line: cur.line_num, detail: "missing child count".into() })?, cur.line_num)?;
        if child_count < 0 {
            return Err(ElementMapError::SemanticConsistency { line: cur.line_num, detail: "negative ChildCount".into() });
        }

        let mut children = Vec::new();
        for _ in 0..child_count {
            let line = cur.next_line()?;
            let mut t = line.split_whitespace();
            let cindex = parse_dec(t.next().ok_or_else(|| ElementMapError::TruncatedChildRecord { line: cur.line_num })?, cur.line_num)?;
            let offset = parse_dec(t.next().ok_or_else(|| ElementMapError::TruncatedChildRecord { line: cur.line_num })?, cur.line_num)?;
            let count = parse_dec(t.next().ok_or_else(|| ElementMapError::TruncatedChildRecord { line: cur.line_num })?, cur.line_num)?;
            if count < 0 {
                return Err(ElementMapError::SemanticConsistency { line: cur.line_num, detail: "negative child count".into() });
            }
            let tag = parse_dec(t.next().ok_or_else(|| ElementMapError::TruncatedChildRecord { line: cur.line_num })?, cur.line_num)?;
            let map_index = parse_dec(t.next().ok_or_else(|| ElementMapError::TruncatedChildRecord { line: cur.line_num })?, cur.line_num)?;
            if map_index > order.len() as i64 {
                return Err(ElementMapError::SemanticConsistency { line: cur.line_num, detail: "forward child-map reference".into() });
            }
            let postfix_token = t.next().ok_or_else(|| ElementMapError::TruncatedChildRecord { line: cur.line_num })?;
            let postfix = postfix_token.strip_prefix(';').unwrap_or(postfix_token).to_owned();
            let sid_token = t.next().ok_or_else(|| ElementMapError::TruncatedChildRecord { line: cur.line_num })?;
            let mut sid_fields = sid_token.split('.');
            let zero = sid_fields.next().ok_or_else(|| ElementMapError::TruncatedChildRecord { line: cur.line_num })?;
            if zero != "0" {
                return Err(ElementMapError::StreamFormat { line: cur.line_num, detail: format!("expected sid terminator field starting with 0, got {:?}", sid_token) });
            }
            let sids = sid_fields
                .map(|s| parse_dec(s, cur.line_num))
                .collect::<ElementMapResult<Vec<i64>>>()?
                .into_iter()
                .map(|id| StringId::from_raw(RESTORE_HASHER_TAG, id))
                .collect();

            let element_map = if map_index == 0 { None } else { order.get((map_index - 1) as usize).cloned() };
            let mut group = ChildElementGroup::new(IndexedName::new(type_tag.clone(), cindex), count);
            group.offset = offset;
            group.tag = tag;
            group.postfix = postfix;
            group.sids = sids;
            group.element_map = element_map;
            children.push((cindex + offset + count, group));
        }

        let _blank = cur.next_line()?;
        let name_header = cur.next_line()?;
        let mut nh_tokens = name_header.split_whitespace();
        let kw = nh_tokens.next().ok_or_else(|| ElementMapError::StreamFormat { line: cur.line_num, detail: "missing NameCount".into() })?;
        if kw != "NameCount" {
            return Err(ElementMapError::StreamFormat { line: cur.line_num, detail: format!("expected NameCount, got {:?}", kw) });
        }
        let name_count = parse_dec(nh_tokens.next().ok_or_else(|| ElementMapError::StreamFormat { line: cur.line_num, detail: "missing name count".into() })?, cur.line_num)?;
        if name_count < 0 {
            return Err(ElementMapError::SemanticConsistency { line: cur.line_num, detail: "negative NameCount".into() });
        }

        let mut chains = Vec::with_capacity(name_count as usize);
        for _ in 0..name_count {
            let line = cur.next_line()?;
            let mut chain = Vec::new();
            for token in line.split_whitespace() {
                if token == "0" {
                    break;
                }
                chain.push(decode_name_token(token, pool, cur.line_num)?);
            }
            chains.push(chain);
        }

        buckets.insert(type_tag, (chains, children));
    }

    let _blank = cur.next_line()?;
    let end = cur.next_line()?;
    if end != "EndMap" {
        return Err(ElementMapError::StreamFormat { line: cur.line_num, detail: format!("expected EndMap, got {:?}", end) });
    }

    map.borrow_mut().rebuild_from_restored(buckets);
    Ok(map)
}

fn skip_until_end_map(cur: &mut LineCursor) -> ElementMapResult<()> {
    loop {
        let line = cur.next_line()?;
        if line == "EndMap" {
            return Ok(());
        }
    }
}

fn decode_name_token(token: &str, pool: &[String], line: usize) -> ElementMapResult<MappedNameRef> {
    let fields: Vec<&str> = token.split('.').collect();
    if fields.is_empty() {
        return Err(ElementMapError::StreamFormat { line, detail: "empty namespec".into() });
    }

    let (mut name, remaining) = match fields[0].chars().next() {
        Some(':') => {
            let type_pool_idx = parse_hex(&fields[0][1..], line)?;
            let index_hex = fields.get(1).ok_or_else(|| ElementMapError::StreamFormat { line, detail: "malformed pooled namespec".into() })?;
            let index = parse_hex(index_hex, line)?;
            let kind = pool.get(type_pool_idx as usize).cloned().unwrap_or_default();
            (MappedName::from(&IndexedName::new(kind, index)), &fields[2..])
        }
        Some('$') | Some(';') => (MappedName::new(&fields[0][1..]), &fields[1..]),
        _ => return Err(ElementMapError::StreamFormat { line, detail: format!("malformed namespec {:?}", token) }),
    };

    let postfix_idx = match remaining.first() {
        Some(s) => parse_hex(s, line)?,
        None => return Err(ElementMapError::StreamFormat { line, detail: "missing postfix index".into() }),
    };
    if let Some(p) = pool.get(postfix_idx as usize) {
        if !p.is_empty() {
            name.append_str(p);
        }
    }
    let sids = remaining[1..]
        .iter()
        .map(|s| parse_hex(s, line))
        .collect::<ElementMapResult<Vec<i64>>>()?
        .into_iter()
        .map(|id| StringId::from_raw(RESTORE_HASHER_TAG, id))
        .collect();

    Ok(MappedNameRef { name, sids })
}

#[cfg(test)]
mod serializer_tests {
    use super::*;
    use crate::indexed_name::IndexedName;

    #[test]
    fn round_trips_a_simple_map() {
        let map = Rc::new(RefCell::new(ElementMap::new()));
        {
            let mut m = map.borrow_mut();
            m.add_name(MappedName::from(&IndexedName::new("Face", 1)), IndexedName::new("Face", 1), Vec::new(), false, None).unwrap();
            m.add_name(MappedName::from(&IndexedName::new("Face", 2)), IndexedName::new("Face", 2), Vec::new(), false, None).unwrap();
        }

        let mut buf = Vec::new();
        save(&map, &mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();

        let restored = restore(&text).unwrap();
        let idx1 = IndexedName::new("Face", 1);
        assert_eq!(
            restored.borrow().find(&MappedName::from(&idx1), None),
            Some(idx1)
        );
    }
}
