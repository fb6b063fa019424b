//! Region Implementation - Unit of Space Management
//!
//! A region is a fixed-size, region-aligned extent of the space with a bump
//! cursor and a tagged state. Regions are owned by the
//! [`RegionTable`](crate::heap::table::RegionTable) and mutated only by the
//! holder of the region lock, so nothing here is atomic.
//!
//! Region Lifecycle:
//! ```text
//!            unfree / unfree_large(_tail)
//!   Free ───────────────────────────────▶ Allocated | Large | LargeTail (ToSpace)
//!    ▲                                                   │
//!    │ clear                              set_from_space │
//!    │                                                   ▼
//!  FromSpace ◀── evacuated ──┬── retained ──▶ UnevacFromSpace
//!                                                        │ clear_from_space
//!                                                        ▼
//!                                                     ToSpace
//! ```
//!
//! The space type only exists while a region is not Free, so a Free region
//! with a type, or a TLAB owner on a large region, cannot be expressed.

use crate::allocator::Allocation;
use crate::runtime::thread::MutatorId;
use crate::util::{format_address, Alignment};
use std::fmt;
use thiserror::Error;

/// Collection role of a non-free region during the current epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegionType {
    /// Allocation target, or survivor of the previous cycle
    ToSpace,
    /// Selected for evacuation; reclaimed after copying
    FromSpace,
    /// Retained in place this cycle; promoted back to to-space afterwards
    UnevacFromSpace,
}

impl fmt::Display for RegionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RegionType::ToSpace => "ToSpace",
            RegionType::FromSpace => "FromSpace",
            RegionType::UnevacFromSpace => "UnevacFromSpace",
        };
        f.write_str(name)
    }
}

/// Occupancy state of a region
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionState {
    /// Unused, available for allocation
    Free,

    /// Bump-allocated small objects, possibly checked out as a TLAB
    Allocated {
        space: RegionType,
        tlab_owner: Option<MutatorId>,
    },

    /// First region of a multi-region object
    Large {
        space: RegionType,
        /// Full size of the object, across all of its regions
        object_size: usize,
        /// Number of `LargeTail` regions that follow
        tail_count: usize,
    },

    /// Continuation of the large object that starts in an earlier region
    LargeTail { space: RegionType },
}

impl RegionState {
    /// Space type, `None` while Free
    pub fn space(&self) -> Option<RegionType> {
        match *self {
            RegionState::Free => None,
            RegionState::Allocated { space, .. }
            | RegionState::Large { space, .. }
            | RegionState::LargeTail { space } => Some(space),
        }
    }

    fn set_space(&mut self, new_space: RegionType) {
        match self {
            RegionState::Free => {}
            RegionState::Allocated { space, .. }
            | RegionState::Large { space, .. }
            | RegionState::LargeTail { space } => *space = new_space,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            RegionState::Free => "Free",
            RegionState::Allocated { .. } => "Allocated",
            RegionState::Large { .. } => "Large",
            RegionState::LargeTail { .. } => "LargeTail",
        }
    }
}

/// A transition was requested on a region whose state does not permit it
///
/// Only the region table produces and consumes these; it treats them as
/// fatal after dumping every region.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("region {index}: cannot {operation} a {state} region")]
pub struct IllegalTransition {
    pub index: usize,
    pub operation: &'static str,
    pub state: String,
}

type Transition = std::result::Result<(), IllegalTransition>;

/// Region - fixed-size unit of the space
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Region {
    /// Position in the region table
    index: usize,

    /// First byte
    begin: usize,

    /// Bump cursor, `begin <= top <= end`
    top: usize,

    /// One past the last byte
    end: usize,

    /// Occupancy and space type
    state: RegionState,

    /// Bytes reported live by the mark phase, `None` when not measured
    live_bytes: Option<usize>,

    /// Handed out for mutator allocation before the mark phase measured it
    is_newly_allocated: bool,

    /// Objects recorded in this region (diagnostics)
    objects_allocated: usize,

    /// Epoch at which the region was last unfreed (diagnostics)
    alloc_time: u64,
}

impl Region {
    /// Create a Free region covering `[begin, end)`
    pub fn new(index: usize, begin: usize, end: usize) -> Self {
        debug_assert!(begin < end);
        Self {
            index,
            begin,
            top: begin,
            end,
            state: RegionState::Free,
            live_bytes: None,
            is_newly_allocated: false,
            objects_allocated: 0,
            alloc_time: 0,
        }
    }

    /// Bump-allocate `num_bytes` from `top`
    ///
    /// # Arguments
    /// * `num_bytes` - Requested size, rounded up to `alignment`
    /// * `alignment` - Power-of-two alignment of the returned address
    ///
    /// # Returns
    /// * `Some(Allocation)` - Address and bytes consumed
    /// * `None` - Not enough room before `end`
    pub fn alloc(&mut self, num_bytes: usize, alignment: usize) -> Option<Allocation> {
        debug_assert!(
            matches!(
                self.state,
                RegionState::Allocated {
                    space: RegionType::ToSpace,
                    tlab_owner: None
                }
            ),
            "bump allocation in {}",
            self
        );
        let size = Alignment::checked_align_up(num_bytes, alignment)?;
        let addr = Alignment::checked_align_up(self.top, alignment)?;
        let new_top = addr.checked_add(size)?;
        if new_top > self.end {
            return None;
        }
        self.top = new_top;
        Some(Allocation {
            addr,
            bytes_allocated: size,
            usable_size: size,
        })
    }

    /// Free → Allocated/ToSpace, stamped with `epoch`
    pub fn unfree(&mut self, epoch: u64) -> Transition {
        self.expect_free("unfree")?;
        self.state = RegionState::Allocated {
            space: RegionType::ToSpace,
            tlab_owner: None,
        };
        self.top = self.begin;
        self.alloc_time = epoch;
        Ok(())
    }

    /// Free → Large/ToSpace, the head of an `object_size` byte object
    pub fn unfree_large(&mut self, epoch: u64, object_size: usize, tail_count: usize) -> Transition {
        self.expect_free("unfree_large")?;
        self.state = RegionState::Large {
            space: RegionType::ToSpace,
            object_size,
            tail_count,
        };
        self.top = self.begin + object_size.min(self.len());
        self.alloc_time = epoch;
        Ok(())
    }

    /// Free → LargeTail/ToSpace, holding `covered_bytes` of the object
    pub fn unfree_large_tail(&mut self, epoch: u64, covered_bytes: usize) -> Transition {
        self.expect_free("unfree_large_tail")?;
        self.state = RegionState::LargeTail {
            space: RegionType::ToSpace,
        };
        self.top = self.begin + covered_bytes.min(self.len());
        self.alloc_time = epoch;
        Ok(())
    }

    /// Mark as handed out for mutator allocation this epoch
    pub fn set_newly_allocated(&mut self) {
        self.is_newly_allocated = true;
    }

    /// Back to Free with every counter reset
    pub fn clear(&mut self) {
        *self = Region::new(self.index, self.begin, self.end);
    }

    /// Select for evacuation; the old measurement no longer applies
    pub fn set_as_from_space(&mut self) -> Transition {
        self.expect_non_free("set_as_from_space")?;
        self.state.set_space(RegionType::FromSpace);
        self.live_bytes = None;
        Ok(())
    }

    /// Retain in place; live bytes restart from zero for the copy phase
    pub fn set_as_unevac_from_space(&mut self) -> Transition {
        self.expect_non_free("set_as_unevac_from_space")?;
        self.state.set_space(RegionType::UnevacFromSpace);
        self.live_bytes = Some(0);
        self.is_newly_allocated = false;
        Ok(())
    }

    /// Promote a retained region back to to-space
    pub fn set_unevac_from_space_as_to_space(&mut self) -> Transition {
        if self.space() != Some(RegionType::UnevacFromSpace) {
            return Err(self.illegal("set_unevac_from_space_as_to_space"));
        }
        self.state.set_space(RegionType::ToSpace);
        Ok(())
    }

    /// Decide whether this region's survivors must be copied out
    ///
    /// Only meaningful on Allocated and Large heads; tails follow their head.
    ///
    /// # Arguments
    /// * `threshold` - Live percent below which an Allocated region is evacuated
    /// * `region_size` - Size of one region
    pub fn should_be_evacuated(&self, threshold: usize, region_size: usize) -> bool {
        if self.is_newly_allocated {
            return true;
        }
        let Some(live) = self.live_bytes else {
            return false;
        };
        match self.state {
            RegionState::Allocated { .. } => {
                let allocated = Alignment::align_up(self.bytes_allocated(), region_size);
                (live as u128) * 100 < (threshold as u128) * (allocated as u128)
            }
            RegionState::Large { .. } => live == 0,
            RegionState::Free | RegionState::LargeTail { .. } => false,
        }
    }

    /// Bytes handed out from this region
    ///
    /// A Large head reports the whole object; its tails report nothing.
    pub fn bytes_allocated(&self) -> usize {
        match self.state {
            RegionState::Allocated { .. } => self.top - self.begin,
            RegionState::Large { object_size, .. } => object_size,
            RegionState::Free | RegionState::LargeTail { .. } => 0,
        }
    }

    /// Objects recorded in this region
    pub fn objects_allocated(&self) -> usize {
        match self.state {
            RegionState::Allocated { .. } => self.objects_allocated,
            RegionState::Large { .. } => 1,
            RegionState::Free | RegionState::LargeTail { .. } => 0,
        }
    }

    /// Accumulate live bytes (an unmeasured region starts from zero)
    pub fn add_live_bytes(&mut self, bytes: usize) {
        self.live_bytes = Some(self.live_bytes.unwrap_or(0) + bytes);
    }

    /// Store the mark phase's measurement
    ///
    /// A newly allocated region keeps its status; it is evacuated whatever
    /// the measurement says.
    pub fn record_live_bytes(&mut self, bytes: usize) {
        self.live_bytes = Some(bytes);
    }

    /// Write back what a revoked TLAB actually used
    pub fn record_thread_local_allocations(&mut self, objects: usize, bytes: usize) {
        debug_assert!(self.is_allocated());
        debug_assert_eq!(self.objects_allocated, 0);
        debug_assert_eq!(self.top, self.end);
        debug_assert!(bytes <= self.len());
        self.objects_allocated = objects;
        self.top = self.begin + bytes;
    }

    /// Count one more object in this region
    pub fn record_alloc(&mut self) {
        self.objects_allocated += 1;
    }

    /// Check the region is fully live: a valid measurement equal to its used bytes
    ///
    /// A Large head's `top` stops at `end`, so it is measured against the
    /// whole object instead.
    pub fn is_fully_live(&self) -> bool {
        match self.state {
            RegionState::Large { object_size, .. } => self.live_bytes == Some(object_size),
            _ => self.live_bytes == Some(self.top - self.begin),
        }
    }

    pub(crate) fn set_tlab_owner(&mut self, owner: Option<MutatorId>) -> Transition {
        match &mut self.state {
            RegionState::Allocated { tlab_owner, .. } => {
                *tlab_owner = owner;
                Ok(())
            }
            _ => Err(self.illegal("set_tlab_owner")),
        }
    }

    pub(crate) fn set_top(&mut self, top: usize) {
        debug_assert!(top >= self.begin && top <= self.end);
        self.top = top;
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn begin(&self) -> usize {
        self.begin
    }

    pub fn top(&self) -> usize {
        self.top
    }

    pub fn end(&self) -> usize {
        self.end
    }

    pub fn len(&self) -> usize {
        self.end - self.begin
    }

    pub fn state(&self) -> RegionState {
        self.state
    }

    pub fn space(&self) -> Option<RegionType> {
        self.state.space()
    }

    pub fn live_bytes(&self) -> Option<usize> {
        self.live_bytes
    }

    pub fn is_newly_allocated(&self) -> bool {
        self.is_newly_allocated
    }

    pub fn alloc_time(&self) -> u64 {
        self.alloc_time
    }

    pub fn tlab_owner(&self) -> Option<MutatorId> {
        match self.state {
            RegionState::Allocated { tlab_owner, .. } => tlab_owner,
            _ => None,
        }
    }

    pub fn is_free(&self) -> bool {
        self.state == RegionState::Free
    }

    pub fn is_allocated(&self) -> bool {
        matches!(self.state, RegionState::Allocated { .. })
    }

    pub fn is_large(&self) -> bool {
        matches!(self.state, RegionState::Large { .. })
    }

    pub fn is_large_tail(&self) -> bool {
        matches!(self.state, RegionState::LargeTail { .. })
    }

    pub fn is_in_to_space(&self) -> bool {
        self.space() == Some(RegionType::ToSpace)
    }

    pub fn is_in_from_space(&self) -> bool {
        self.space() == Some(RegionType::FromSpace)
    }

    pub fn is_in_unevac_from_space(&self) -> bool {
        self.space() == Some(RegionType::UnevacFromSpace)
    }

    /// Check if address is inside this region
    pub fn contains(&self, addr: usize) -> bool {
        addr >= self.begin && addr < self.end
    }

    fn expect_free(&self, operation: &'static str) -> Transition {
        if self.is_free() {
            Ok(())
        } else {
            Err(self.illegal(operation))
        }
    }

    fn expect_non_free(&self, operation: &'static str) -> Transition {
        if self.is_free() {
            Err(self.illegal(operation))
        } else {
            Ok(())
        }
    }

    fn illegal(&self, operation: &'static str) -> IllegalTransition {
        let state = match self.space() {
            Some(space) => format!("{}/{}", self.state.name(), space),
            None => self.state.name().to_string(),
        };
        IllegalTransition {
            index: self.index,
            operation,
            state,
        }
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Region[{}]={}-{}-{} state={}",
            self.index,
            format_address(self.begin),
            format_address(self.top),
            format_address(self.end),
            self.state.name()
        )?;
        match self.space() {
            Some(space) => write!(f, " type={}", space)?,
            None => write!(f, " type=None")?,
        }
        if let RegionState::Large {
            object_size,
            tail_count,
            ..
        } = self.state
        {
            write!(f, " object_size={} tails={}", object_size, tail_count)?;
        }
        write!(
            f,
            " objects_allocated={} alloc_time={}",
            self.objects_allocated(),
            self.alloc_time
        )?;
        match self.live_bytes {
            Some(live) => write!(f, " live_bytes={}", live)?,
            None => write!(f, " live_bytes=unmeasured")?,
        }
        write!(f, " is_newly_allocated={}", self.is_newly_allocated)?;
        match self.tlab_owner() {
            Some(owner) => write!(f, " thread={}", owner),
            None => write!(f, " thread=none"),
        }
    }
}
