//! The built-in analysis pass.
//!
//! Disassembling: bounded recursive descent from each queued function
//! start, run across functions on the rayon pool. Blocks are cut at every
//! leader (entry, branch target, conditional fallthrough) once exploration
//! is done, so a jump into the middle of known code splits the block.
//!
//! Analyzing: results are stored one function at a time; branch and call
//! targets become code xrefs, numeric operands pointing at mapped bytes
//! become data xrefs, call targets become auto functions and are disassembled
//! in the same run.
//!
//! Extended: string discovery over readable, non-executable segments.

use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::{Arc, Weak};
use tracing::{debug, info};

use crate::config::AnalysisConfig;
use crate::core::{
    AddressRange, BasicBlock, BlockEdge, BranchKind, EdgeKind, Function, InstructionInfo, Segment,
    StringReference, XrefKind,
};
use crate::disasm::Architecture;
use crate::metadata::strings::scan_strings;
use crate::space::AddressSpace;

use super::scheduler::{AnalysisPass, PassContext};
use super::state::AnalysisState;

pub struct SpaceAnalysisPass {
    space: Weak<AddressSpace>,
}

impl SpaceAnalysisPass {
    pub fn new(space: Weak<AddressSpace>) -> Self {
        Self { space }
    }
}

impl AnalysisPass for SpaceAnalysisPass {
    fn run(&self, ctx: &PassContext) {
        let Some(space) = self.space.upgrade() else {
            return;
        };
        run_pass(&space, ctx);
    }
}

#[derive(Debug, Clone, Copy)]
struct Limits {
    max_function_size: u64,
    max_blocks: usize,
}

impl From<&AnalysisConfig> for Limits {
    fn from(config: &AnalysisConfig) -> Self {
        Self {
            max_function_size: config.max_function_size,
            max_blocks: config.max_blocks_per_function,
        }
    }
}

/// What disassembly found for one function
#[derive(Debug, Default)]
struct Discovery {
    start: u64,
    blocks: Vec<BasicBlock>,
    call_sites: Vec<(u64, u64)>,
    refs: Vec<(u64, u64, XrefKind)>,
    skipped: bool,
}

fn run_pass(space: &Arc<AddressSpace>, ctx: &PassContext) {
    let limits = Limits::from(&space.config().analysis);
    let architecture = space.architecture();
    let mut analyzed = 0usize;

    loop {
        let batch = space.functions.write().take_queue();
        if batch.is_empty() {
            break;
        }
        if ctx.is_aborted() {
            space.functions.write().queue.extend(batch);
            return;
        }

        ctx.set_phase(AnalysisState::Disassembling, batch.len());
        let discoveries: Vec<Discovery> = batch
            .par_iter()
            .map(|&start| {
                ctx.begin_function(start);
                let found = match &architecture {
                    Some(arch) => discover(space, arch.as_ref(), start, limits, ctx),
                    None => Discovery {
                        start,
                        skipped: true,
                        ..Default::default()
                    },
                };
                ctx.end_function(start);
                ctx.advance(1);
                found
            })
            .collect();
        if ctx.is_aborted() {
            space.functions.write().queue.extend(batch);
            return;
        }

        ctx.set_phase(AnalysisState::Analyzing, discoveries.len());
        for found in discoveries {
            apply(space, found);
            analyzed += 1;
            ctx.advance(1);
        }
    }

    if ctx.is_aborted() {
        return;
    }
    ctx.set_phase(AnalysisState::Extended, 0);
    find_strings(space, ctx);
    info!(functions = analyzed, "analysis pass finished");
}

fn apply(space: &AddressSpace, found: Discovery) {
    let ranges: Vec<AddressRange> = found.blocks.iter().map(|b| b.range()).collect();
    let callees: BTreeSet<u64> = found.call_sites.iter().map(|(_, t)| *t).collect();
    let mut function = Function::new(found.start, true);
    function.basic_blocks = found.blocks;
    function.call_sites = found.call_sites;
    function.analysis_skipped = found.skipped;
    if !space.update_function(function) {
        return;
    }
    space.replace_auto_xrefs(&ranges, found.refs);
    for callee in callees {
        space.add_analysis_function(callee);
    }
}

fn discover(
    space: &AddressSpace,
    arch: &dyn Architecture,
    start: u64,
    limits: Limits,
    ctx: &PassContext,
) -> Discovery {
    let mut found = Discovery {
        start,
        ..Default::default()
    };
    let mut decoded: BTreeMap<u64, InstructionInfo> = BTreeMap::new();
    let mut leaders: BTreeSet<u64> = BTreeSet::from([start]);
    let mut queue: VecDeque<u64> = VecDeque::from([start]);
    let mut seen: BTreeSet<u64> = BTreeSet::from([start]);

    'explore: while let Some(block_start) = queue.pop_front() {
        let mut cur = block_start;
        loop {
            if ctx.is_aborted() {
                break 'explore;
            }
            if decoded.contains_key(&cur) {
                leaders.insert(cur);
                break;
            }
            if leaders.len() > limits.max_blocks || cur.abs_diff(start) >= limits.max_function_size {
                found.skipped = true;
                break 'explore;
            }
            if !space.is_offset_executable(cur) {
                break;
            }
            let bytes = space.read(cur, arch.max_instruction_length());
            if bytes.is_empty() {
                break;
            }
            let mut info = arch.decode_one_instruction(&bytes, cur);
            if !info.is_valid() {
                break;
            }
            let next = cur.saturating_add(info.length as u64);

            let targets: Vec<u64> = info.branches.iter().filter_map(|b| b.target).collect();
            for token in info.tokens.iter().filter(|t| t.is_numeric()) {
                if token.value != 0
                    && !targets.contains(&token.value)
                    && space.is_valid_offset(token.value)
                {
                    found.refs.push((cur, token.value, XrefKind::Data));
                }
            }
            for branch in &info.branches {
                let Some(target) = branch.target else {
                    continue;
                };
                match branch.kind {
                    BranchKind::Call => {
                        found.call_sites.push((cur, target));
                        found.refs.push((cur, target, XrefKind::Code));
                    }
                    BranchKind::Unconditional | BranchKind::Conditional => {
                        found.refs.push((cur, target, XrefKind::Code));
                        leaders.insert(target);
                        if seen.insert(target) {
                            queue.push_back(target);
                        }
                    }
                    _ => {}
                }
            }

            let ends_block = info.ends_block();
            let ends_flow = info.ends_flow();
            info.tokens.clear();
            decoded.insert(cur, info);
            if ends_block {
                if !ends_flow {
                    leaders.insert(next);
                    if seen.insert(next) {
                        queue.push_back(next);
                    }
                }
                break;
            }
            cur = next;
        }
    }

    if found.skipped {
        debug!(
            function = format_args!("{:#x}", start),
            "function exceeds analysis limits"
        );
        found.refs.clear();
        found.call_sites.clear();
        return found;
    }
    found.blocks = cut_blocks(&decoded, &leaders);
    found
}

/// Split decoded instructions into blocks at every leader.
fn cut_blocks(decoded: &BTreeMap<u64, InstructionInfo>, leaders: &BTreeSet<u64>) -> Vec<BasicBlock> {
    let mut blocks = Vec::new();
    for &leader in leaders {
        if !decoded.contains_key(&leader) {
            continue;
        }
        let mut cur = leader;
        let mut outgoing = Vec::new();
        while let Some(info) = decoded.get(&cur) {
            let next = cur.saturating_add(info.length as u64);
            if info.ends_block() {
                for branch in &info.branches {
                    let edge = match branch.kind {
                        BranchKind::Unconditional => Some(EdgeKind::Unconditional),
                        BranchKind::Conditional => Some(EdgeKind::True),
                        BranchKind::Indirect => Some(EdgeKind::Indirect),
                        _ => None,
                    };
                    if let Some(kind) = edge {
                        outgoing.push(BlockEdge {
                            kind,
                            target: branch.target,
                        });
                    }
                }
                if !info.ends_flow() {
                    outgoing.push(BlockEdge {
                        kind: EdgeKind::False,
                        target: Some(next),
                    });
                }
                cur = next;
                break;
            }
            cur = next;
            if leaders.contains(&cur) && decoded.contains_key(&cur) {
                outgoing.push(BlockEdge {
                    kind: EdgeKind::Fallthrough,
                    target: Some(cur),
                });
                break;
            }
        }
        blocks.push(BasicBlock {
            start: leader,
            end: cur,
            outgoing,
        });
    }
    blocks
}

fn find_strings(space: &AddressSpace, ctx: &PassContext) {
    for segment in space.segments() {
        if ctx.is_aborted() {
            return;
        }
        if !segment.is_readable() || segment.is_executable() || segment.is_empty() {
            continue;
        }
        let Some(found) = segment_strings(space, &segment, ctx) else {
            return;
        };
        let range = AddressRange::from_len(segment.start(), segment.len());
        debug!(segment = %segment, strings = found.len(), "string scan");
        space.replace_strings(range, found);
    }
}

/// Bytes re-read before each window so a run that began earlier is not
/// reported a second time from the window edge.
const STRING_LOOKBACK: u64 = 2;

/// Strings in the storage-backed part of `segment`, read one window at a time.
///
/// Consecutive windows overlap by twice the maximum string length, so a
/// string owned by one window is always seen up to its cut length. The
/// zero-filled tail holds no text and is never read. `None` means aborted.
fn segment_strings(
    space: &AddressSpace,
    segment: &Segment,
    ctx: &PassContext,
) -> Option<Vec<StringReference>> {
    let config = space.config();
    let min = config.analysis.min_string_length;
    let max = config.analysis.max_string_length.max(1);
    let overlap = (max as u64).saturating_mul(2);
    let window = (config.search.chunk_size as u64).max(overlap * 2 + STRING_LOOKBACK * 2);
    let end = segment.start() + segment.data_length.min(segment.len());

    let mut found = Vec::new();
    let mut pos = segment.start();
    while pos < end {
        if ctx.is_aborted() {
            return None;
        }
        let from = pos.saturating_sub(STRING_LOOKBACK).max(segment.start());
        let want = (end - from).min(window) as usize;
        let data = space.read(from, want);
        if data.is_empty() {
            break;
        }
        let window_end = from + data.len() as u64;
        let last = data.len() < want || window_end >= end;
        let owned_end = if last { window_end } else { window_end - overlap };
        found.extend(
            scan_strings(&data, from, min, max)
                .into_iter()
                .filter(|s| s.start >= pos && s.start < owned_end),
        );
        if last {
            break;
        }
        pos = owned_end;
    }
    Some(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SpaceConfig;
    use crate::core::SegmentFlags;
    use crate::disasm::IcedArchitecture;
    use crate::storage::BufferAccessor;

    // 0x1000: test eax,eax ; je 0x1009 ; call 0x1010 ; ret
    // 0x1010: mov eax, 0x2000 ; ret
    fn program() -> Vec<u8> {
        let mut code = vec![0x90u8; 0x20];
        code[..8].copy_from_slice(&[0x85, 0xc0, 0x74, 0x05, 0xe8, 0x07, 0x00, 0x00]);
        code[8] = 0x00;
        code[9] = 0xc3;
        code[0x10..0x16].copy_from_slice(&[0xb8, 0x00, 0x20, 0x00, 0x00, 0xc3]);
        code
    }

    fn space() -> Arc<AddressSpace> {
        let mut config = SpaceConfig::default();
        config.analysis.auto_schedule = false;
        let mut bytes = program();
        bytes.extend_from_slice(b"\0\0hello analysis\0");
        let space = AddressSpace::builder()
            .storage(BufferAccessor::new(bytes))
            .architecture(Arc::new(IcedArchitecture::x86_64()))
            .config(config)
            .build()
            .unwrap();
        space
            .add_auto_segment(0x1000, 0x20, 0, 0x20, SegmentFlags::rwx(true, false, true))
            .unwrap();
        space
            .add_auto_segment(0x2000, 0x11, 0x20, 0x11, SegmentFlags::READABLE)
            .unwrap();
        space
    }

    #[test]
    fn test_discovers_blocks_calls_and_refs() {
        let space = space();
        space.add_entry_point(0x1000);
        space.update_analysis_and_wait();

        let f = space.get_function_at(0x1000).unwrap();
        let starts: Vec<u64> = f.basic_blocks.iter().map(|b| b.start).collect();
        assert_eq!(starts, vec![0x1000, 0x1004, 0x1009]);
        assert_eq!(f.call_sites, vec![(0x1004, 0x1010)]);
        assert_eq!(f.basic_blocks[0].outgoing.len(), 2);

        let callee = space.get_function_at(0x1010).unwrap();
        assert_eq!(callee.basic_blocks.len(), 1);
        assert_eq!(space.get_callers(0x1010), vec![0x1004]);
        assert_eq!(space.get_data_refs(0x2000, 1).len(), 1);
        assert!(space.has_initial_analysis());
        assert!(space.get_string_at(0x2002, false).is_some());
    }

    #[test]
    fn test_missing_architecture_marks_skipped() {
        let space = space();
        space.set_architecture(None);
        space.add_function(0x1000);
        space.update_analysis_and_wait();
        let f = space.get_function_at(0x1000).unwrap();
        assert!(f.analysis_skipped);
        assert!(f.basic_blocks.is_empty());
    }

    #[test]
    fn test_unbacked_tail_is_not_scanned() {
        let space = space();
        space
            .add_auto_segment(0x4000_0000, 0x4000_0000, 0, 0, SegmentFlags::rwx(true, true, false))
            .unwrap();
        space
            .add_auto_segment(0x3000, 0x1000, 0x20, 0x11, SegmentFlags::READABLE)
            .unwrap();
        space.update_analysis_and_wait();
        assert!(space.get_strings(0x4000_0000, 0x4000_0000).is_empty());
        let tail = space.get_strings(0x3000, 0x1000);
        assert_eq!(tail.len(), 1);
        assert_eq!(tail[0].start, 0x3002);
        assert_eq!(tail[0].length, 14);
    }

    #[test]
    fn test_windowed_scan_matches_whole_scan() {
        let mut bytes = vec![0u8; 0x180];
        bytes[0x1c..0x2c].copy_from_slice(b"straddles window");
        bytes[0x40..0x4a].copy_from_slice(b"short one!");
        for (i, c) in "wide text".bytes().enumerate() {
            bytes[0x61 + i * 2] = c;
        }
        bytes[0x90..0x150].fill(b'A');
        let expected = scan_strings(&bytes, 0x8000, 4, 16);

        let mut config = SpaceConfig::default();
        config.analysis.auto_schedule = false;
        config.analysis.min_string_length = 4;
        config.analysis.max_string_length = 16;
        config.search.chunk_size = 16;
        let space = AddressSpace::builder()
            .storage(BufferAccessor::new(bytes))
            .config(config)
            .build()
            .unwrap();
        space
            .add_auto_segment(0x8000, 0x180, 0, 0x180, SegmentFlags::READABLE)
            .unwrap();
        space.update_analysis_and_wait();

        let found = space.get_strings(0x8000, 0x180);
        assert_eq!(found, expected);
        let straddling: Vec<_> = found.iter().filter(|s| s.start == 0x801c).collect();
        assert_eq!(straddling.len(), 1);
        assert_eq!(straddling[0].length, 16);
        assert!(found.iter().any(|s| s.start == 0x8061 && s.length == 18));
    }
}
