//! Genomics building blocks for population base calling.
//!
//! Alignments are read column by column through per-sample cursors, packed
//! into sample-wide batch records and scored with the BaseType model. The
//! pieces here are independent of how work is spread over processes; see
//! [`crate::pipeline`] for that.

mod alignment;
mod batch;
pub mod basetype;
mod indel;
mod pileup;
mod reference;
mod region;
mod strand_bias;
mod types;
mod variant_caller;
pub mod vcf;

pub use alignment::{
    load_alignment_list, open_indexed, resolve_samples, sample_id_from_filename,
    sample_id_from_header, AlignmentError, HtsPileupSource, IndelHint, PileupColumn, PileupEntry,
    PileupSource, ReadPileupSource, SampleSource, MAX_PILEUP_DEPTH,
};
pub use basetype::{default_min_af, BaseType, CallerParams};
pub use batch::{
    config_digest, decode_entries, encode_entries, inspect_existing, BatchEncoder, BatchEntry,
    BatchError, BatchHeader, BatchMerger, BatchReader, BatchRecord, BatchWriter, RerunStatus,
    SampleSlots, DEFAULT_BATCH_WIDTH,
};
pub use indel::{extract_indel, IndelScanError};
pub use pileup::{
    observe, FirstQualifyingRead, HighestBaseQuality, PileupError, PileupObservation,
    ReadSelection, ReadSelectionPolicy, SampleCursor, DEFAULT_MIN_MAPQ,
};
pub use reference::{FastaReference, ReferenceError, ReferenceWindow, WINDOW_PADDING};
pub use region::{
    load_position_file, load_region_argument, merge_regions, parse_position_row,
    parse_region_token, resolve_target_regions, write_region_file, ContigIndex, GenomicRegion,
    RegionError,
};
pub use strand_bias::{fisher_exact_two_sided, strand_bias, StrandBias};
pub use types::{base_index, AlignedRead, CigarOp, CigarOpKind, SampleBase, Strand, BASES};
pub use variant_caller::{SiteCall, SiteCaller};
pub use vcf::{CoverageRecord, VariantRecord, COVERAGE_HEADER};
