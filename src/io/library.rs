//! Flat ligand-library access.
//!
//! The library is a pair of files: a packed array of little-endian `u64`
//! byte offsets, one per ligand, and a concatenated text file of ligand
//! records. The first line of each record carries fixed-column descriptor
//! fields used for pre-docking filters.

use super::IoError;
use crate::math::Fl;
use byteorder::{LittleEndian, ReadBytesExt};
use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::Path;

/// Fixed-column descriptor fields of a ligand record (first line), parsed
/// from the 1-based inclusive column ranges of the library format.
#[derive(Debug, Clone, PartialEq)]
pub struct Descriptor {
    pub id: String,
    pub mwt: Fl,
    pub logp: Fl,
    pub ad: Fl,
    pub pd: Fl,
    pub hbd: u32,
    pub hba: u32,
    pub tpsa: u32,
    pub charge: i64,
    pub nrb: u32,
}

/// Columns are 1-based inclusive.
fn field(line: &str, lo: usize, hi: usize) -> Option<&str> {
    line.get(lo - 1..hi).map(str::trim)
}

impl Descriptor {
    /// Parses the descriptor line. Any missing or malformed field yields
    /// `None`, which callers treat as a filter miss.
    pub fn parse(line: &str) -> Option<Descriptor> {
        Some(Descriptor {
            id: field(line, 11, 18)?.to_string(),
            mwt: field(line, 22, 28)?.parse().ok()?,
            logp: field(line, 31, 37)?.parse().ok()?,
            ad: field(line, 40, 46)?.parse().ok()?,
            pd: field(line, 49, 55)?.parse().ok()?,
            hbd: field(line, 58, 59)?.parse().ok()?,
            hba: field(line, 62, 63)?.parse().ok()?,
            tpsa: field(line, 66, 67)?.parse().ok()?,
            charge: field(line, 70, 71)?.parse().ok()?,
            nrb: field(line, 74, 75)?.parse().ok()?,
        })
    }
}

/// Random access to the ligand library through the offset index.
pub struct LigandLibrary {
    headers: BufReader<File>,
    ligands: BufReader<File>,
    num_ligands: u64,
}

impl LigandLibrary {
    pub fn open<P: AsRef<Path>>(headers_path: P, ligands_path: P) -> Result<Self, IoError> {
        let headers_file = File::open(headers_path)?;
        let num_ligands = headers_file.metadata()?.len() / 8;
        Ok(Self {
            headers: BufReader::new(headers_file),
            ligands: BufReader::new(File::open(ligands_path)?),
            num_ligands,
        })
    }

    pub fn num_ligands(&self) -> u64 {
        self.num_ligands
    }

    /// Byte offset of ligand `index` in the record file.
    pub fn offset(&mut self, index: u64) -> Result<u64, IoError> {
        self.headers.seek(SeekFrom::Start(index * 8))?;
        Ok(self.headers.read_u64::<LittleEndian>()?)
    }

    /// Seeks to a record and reads its descriptor line. The reader is left
    /// positioned at the record body, ready for [`Self::record_body`].
    pub fn descriptor(&mut self, offset: u64) -> Result<Option<Descriptor>, IoError> {
        self.ligands.seek(SeekFrom::Start(offset))?;
        let mut line = String::with_capacity(80);
        self.ligands.read_line(&mut line)?;
        Ok(Descriptor::parse(line.trim_end_matches(['\r', '\n'])))
    }

    /// Reads the remainder of the current record, through its TORSDOF line.
    pub fn record_body(&mut self) -> Result<String, IoError> {
        let mut body = String::new();
        let mut line = String::with_capacity(80);
        loop {
            line.clear();
            if self.ligands.read_line(&mut line)? == 0 {
                break;
            }
            body.push_str(&line);
            if line.starts_with("TORSDOF") {
                break;
            }
        }
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::WriteBytesExt;
    use std::io::Write;

    /// Builds a descriptor line with every field right-aligned in its
    /// column range.
    pub(crate) fn descriptor_line(
        id: &str,
        mwt: Fl,
        logp: Fl,
        ad: Fl,
        pd: Fl,
        hbd: u32,
        hba: u32,
        tpsa: u32,
        charge: i64,
        nrb: u32,
    ) -> String {
        let mut line = vec![b' '; 75];
        let mut place = |lo: usize, hi: usize, s: String| {
            let bytes = s.as_bytes();
            let width = hi - lo + 1;
            assert!(bytes.len() <= width, "field {s} too wide");
            line[hi - bytes.len()..hi].copy_from_slice(bytes);
        };
        place(11, 18, id.to_string());
        place(22, 28, format!("{mwt:.1}"));
        place(31, 37, format!("{logp:.2}"));
        place(40, 46, format!("{ad:.1}"));
        place(49, 55, format!("{pd:.1}"));
        place(58, 59, hbd.to_string());
        place(62, 63, hba.to_string());
        place(66, 67, tpsa.to_string());
        place(70, 71, charge.to_string());
        place(74, 75, nrb.to_string());
        String::from_utf8(line).unwrap()
    }

    pub(crate) fn record_text(descriptor: &str, serial_base: u32) -> String {
        let atom = |serial: u32, name: &str, x: Fl, ad: &str| {
            format!(
                "ATOM  {serial:>5} {name:<4} LIG A   1    {x:8.3}{:8.3}{:8.3}  0.00  0.00    +0.000 {ad:<2}\n",
                0.0, 0.0
            )
        };
        let mut text = String::new();
        text.push_str(descriptor);
        text.push('\n');
        text.push_str("ROOT\n");
        text.push_str(&atom(serial_base, "C1", 0.0, "C"));
        text.push_str(&atom(serial_base + 1, "N1", 1.4, "N"));
        text.push_str("ENDROOT\n");
        text.push_str("TORSDOF 0\n");
        text
    }

    fn write_library(dir: &std::path::Path, records: &[String]) -> (std::path::PathBuf, std::path::PathBuf) {
        let ligands_path = dir.join("ligands.pdbqt");
        let headers_path = dir.join("headers.bin");
        let mut ligands = Vec::new();
        let mut headers = Vec::new();
        for record in records {
            headers
                .write_u64::<LittleEndian>(ligands.len() as u64)
                .unwrap();
            ligands.extend_from_slice(record.as_bytes());
        }
        std::fs::File::create(&ligands_path)
            .unwrap()
            .write_all(&ligands)
            .unwrap();
        std::fs::File::create(&headers_path)
            .unwrap()
            .write_all(&headers)
            .unwrap();
        (headers_path, ligands_path)
    }

    #[test]
    fn descriptor_fields_parse_from_fixed_columns() {
        let line = descriptor_line("ZINC0001", 431.2, 2.5, 10.0, -20.0, 2, 5, 60, 0, 4);
        let d = Descriptor::parse(&line).unwrap();
        assert_eq!(d.id, "ZINC0001");
        assert_eq!(d.mwt, 431.2);
        assert_eq!(d.logp, 2.5);
        assert_eq!(d.hbd, 2);
        assert_eq!(d.hba, 5);
        assert_eq!(d.tpsa, 60);
        assert_eq!(d.charge, 0);
        assert_eq!(d.nrb, 4);
    }

    #[test]
    fn malformed_descriptor_is_none() {
        assert_eq!(Descriptor::parse("too short"), None);
        let mut line = descriptor_line("ZINC0001", 431.2, 2.5, 10.0, -20.0, 2, 5, 60, 0, 4);
        line.replace_range(21..28, "  abcde");
        assert_eq!(Descriptor::parse(&line), None);
    }

    #[test]
    fn offsets_locate_records() {
        let dir = tempfile::tempdir().unwrap();
        let records = vec![
            record_text(
                &descriptor_line("ZINC0001", 420.0, 1.0, 0.0, -10.0, 2, 3, 40, 0, 3),
                1,
            ),
            record_text(
                &descriptor_line("ZINC0002", 480.0, 3.0, 5.0, -60.0, 1, 6, 70, 0, 5),
                11,
            ),
        ];
        let (headers_path, ligands_path) = write_library(dir.path(), &records);

        let mut library = LigandLibrary::open(&headers_path, &ligands_path).unwrap();
        assert_eq!(library.num_ligands(), 2);

        // Reading out of order exercises the seeks.
        let off1 = library.offset(1).unwrap();
        let d1 = library.descriptor(off1).unwrap().unwrap();
        assert_eq!(d1.id, "ZINC0002");
        let body = library.record_body().unwrap();
        assert!(body.starts_with("ROOT"));
        assert!(body.trim_end().ends_with("TORSDOF 0"));

        let off0 = library.offset(0).unwrap();
        assert_eq!(off0, 0);
        let d0 = library.descriptor(off0).unwrap().unwrap();
        assert_eq!(d0.id, "ZINC0001");
    }
}
