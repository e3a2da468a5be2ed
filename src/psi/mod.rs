pub mod assembler;
pub mod cat;
pub mod ecm;
pub mod pat;
pub mod pmt;
pub mod section;

pub use assembler::SectionAssembler;
pub use cat::{parse_cat, CatSection};
pub use ecm::{parse_ecm, parse_emm, CaMessageSection};
pub use pat::{parse_pat, PatSection};
pub use pmt::{parse_pmt, CaDescriptor, PmtSection};
