//! Static capability tables: which operation each backend runs for a kind.

use crate::{Backend, Kind, ParseError};

/// Engine-specific description of how to produce one kind of output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Service route to post the document to.
    Route(&'static str),
    /// Value of the engine's output selector.
    Output(&'static str),
    /// Mode flags, each followed by an output location on the command line.
    Flags(&'static [&'static str]),
}

const GROBID: &[(Kind, Operation)] = &[(Kind::Text, Operation::Route("processFulltextDocument"))];

const SCIENCE_PARSE: &[(Kind, Operation)] = &[(Kind::Text, Operation::Route("v1"))];

const CERMINE: &[(Kind, Operation)] = &[
    (Kind::Text, Operation::Output("jats")),
    (Kind::Figure, Operation::Output("images")),
];

const PDFFIGURES: &[(Kind, Operation)] = &[(Kind::Figure, Operation::Flags(&["-c", "-j"]))];

const PDFFIGURES2: &[(Kind, Operation)] = &[
    (Kind::Text, Operation::Flags(&["-g"])),
    (Kind::Figure, Operation::Flags(&["-d", "-m"])),
];

/// The capability table of `backend`.
pub fn capabilities(backend: Backend) -> &'static [(Kind, Operation)] {
    match backend {
        Backend::Grobid => GROBID,
        Backend::ScienceParse => SCIENCE_PARSE,
        Backend::Cermine => CERMINE,
        Backend::PdfFigures => PDFFIGURES,
        Backend::PdfFigures2 => PDFFIGURES2,
    }
}

/// Look up the operation producing `kind` on `backend`.
///
/// Pure lookup; callers run it before touching the filesystem or network.
pub fn resolve(backend: Backend, kind: Kind) -> Result<Operation, ParseError> {
    capabilities(backend)
        .iter()
        .find(|(k, _)| *k == kind)
        .map(|(_, op)| *op)
        .ok_or(ParseError::UnsupportedKind { backend, kind })
}
