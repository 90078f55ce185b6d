//! genePred to refFlat conversion for Picard's CollectRnaSeqMetrics
//!
//! `gtfToGenePred -genePredExt` writes one transcript per line:
//! 1. name (transcript id)
//! 2. chrom
//! 3. strand
//! 4. txStart
//! 5. txEnd
//! 6. cdsStart
//! 7. cdsEnd
//! 8. exonCount
//! 9. exonStarts
//! 10. exonEnds
//! 11. score
//! 12. name2 (gene name)
//! 13-15. cdsStartStat, cdsEndStat, exonFrames
//!
//! refFlat is the gene name followed by the first ten genePred columns.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use crate::error::Error;

/// Name of the refFlat table written into the output directory.
pub const REFFLAT_FILE_NAME: &str = "refFlat_for_picard.refFlat";

/// Number of genePred columns carried into refFlat after the gene name.
const GENEPRED_COLUMNS: usize = 10;

/// Convert a single genePredExt line into a refFlat line (no newline).
///
/// Works on raw bytes: gtfToGenePred copies names through from the GTF
/// unchanged, so they need not be UTF-8. The gene name is the 12th
/// whitespace-delimited field; a line too short to have one gets an empty
/// gene name.
pub fn refflat_line(line: &[u8]) -> Vec<u8> {
    let gene_name = line
        .split(|b| b.is_ascii_whitespace())
        .filter(|field| !field.is_empty())
        .nth(11)
        .unwrap_or_default();

    let mut out = Vec::with_capacity(line.len() + gene_name.len() + 1);
    out.extend_from_slice(gene_name);
    for field in line.split(|&b| b == b'\t').take(GENEPRED_COLUMNS) {
        out.push(b'\t');
        out.extend_from_slice(field);
    }
    out
}

/// Stream genePred records from `reader` into refFlat records on `writer`.
///
/// Blank lines are skipped. Read failures are reported against `src` and
/// write failures against `dst`. Returns the number of records written.
pub fn write_refflat<R: BufRead, W: Write>(
    mut reader: R,
    mut writer: W,
    src: &Path,
    dst: &Path,
) -> Result<usize, Error> {
    let mut n_records = 0;
    let mut line = Vec::new();
    loop {
        line.clear();
        let n = reader
            .read_until(b'\n', &mut line)
            .map_err(|e| Error::io(e, src))?;
        if n == 0 {
            break;
        }

        let record = trim_line_end(&line);
        if record.iter().all(u8::is_ascii_whitespace) {
            continue;
        }

        let mut out = refflat_line(record);
        out.push(b'\n');
        writer.write_all(&out).map_err(|e| Error::io(e, dst))?;
        n_records += 1;
    }
    writer.flush().map_err(|e| Error::io(e, dst))?;
    Ok(n_records)
}

fn trim_line_end(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

/// Convert the genePred file at `src` into a refFlat file at `dst`.
pub fn convert_file(src: &Path, dst: &Path) -> Result<usize, Error> {
    let reader = BufReader::new(File::open(src).map_err(|e| Error::io(e, src))?);
    let writer = BufWriter::new(File::create(dst).map_err(|e| Error::io(e, dst))?);
    write_refflat(reader, writer, src, dst)
}
