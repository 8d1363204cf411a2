//! PDBQT parsing and slice output.

pub mod library;

use crate::atom::{Atom, XsType};
use crate::math::{Fl, Vec3};
use crate::molecule::ligand::{FrameSpec, LigandError};
use crate::molecule::{Ligand, Receptor};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use thiserror::Error;

/// Errors that can occur while parsing molecules or writing output.
#[derive(Error, Debug)]
pub enum IoError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("parse error at line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("ligand structure error: {0}")]
    Ligand(#[from] LigandError),
}

fn parse_error(line: usize, message: impl Into<String>) -> IoError {
    IoError::Parse {
        line,
        message: message.into(),
    }
}

/// One ATOM / HETATM record before type resolution.
struct RawAtom {
    serial: u32,
    name: String,
    coordinate: Vec3,
    ad_type: String,
}

fn parse_atom_record(line: &str, line_number: usize) -> Result<RawAtom, IoError> {
    if line.len() < 78 {
        return Err(parse_error(line_number, "atom record too short"));
    }

    let serial = line[6..11]
        .trim()
        .parse::<u32>()
        .map_err(|_| parse_error(line_number, format!("bad serial: {}", &line[6..11])))?;
    let name = line[12..16].trim().to_string();

    let coord = |range: std::ops::Range<usize>| -> Result<Fl, IoError> {
        line[range.clone()]
            .trim()
            .parse::<Fl>()
            .map_err(|_| parse_error(line_number, format!("bad coordinate: {}", &line[range])))
    };
    let coordinate = Vec3::new(coord(30..38)?, coord(38..46)?, coord(46..54)?);

    let ad_type = line[77..].trim().to_string();

    Ok(RawAtom {
        serial,
        name,
        coordinate,
        ad_type,
    })
}

/// Resolves context-dependent types: nitrogens and oxygens with a polar
/// hydrogen within covalent reach become donors, and carbons bonded to a
/// heteroatom lose their hydrophobic character.
fn resolve_types(atoms: &mut [Atom], polar_hydrogens: &[Vec3]) {
    const POLAR_H_BOND_SQR: Fl = 1.21; // 1.1 A

    for i in 0..atoms.len() {
        let near_polar_h = polar_hydrogens
            .iter()
            .any(|h| crate::math::distance_sqr(&atoms[i].coordinate, h) < POLAR_H_BOND_SQR);
        if near_polar_h {
            atoms[i].xs = atoms[i].xs.to_donor();
        }
    }

    for i in 0..atoms.len() {
        if atoms[i].xs != XsType::CH {
            continue;
        }
        let bonded_to_heteroatom = (0..atoms.len()).any(|j| {
            j != i
                && atoms[j].xs.is_heteroatom()
                && crate::molecule::is_covalent_neighbor(&atoms[i], &atoms[j])
        });
        if bonded_to_heteroatom {
            atoms[i].xs = XsType::CP;
        }
    }
}

/// Parses a receptor from PDBQT text. Hydrogens are consumed for donor
/// typing and then dropped; records of unsupported elements are skipped.
pub fn parse_receptor(text: &str) -> Result<Receptor, IoError> {
    let mut atoms = Vec::new();
    let mut polar_hydrogens = Vec::new();

    for (i, line) in text.lines().enumerate() {
        let line_number = i + 1;
        if !(line.starts_with("ATOM") || line.starts_with("HETATM")) {
            continue;
        }
        let raw = parse_atom_record(line, line_number)?;
        match raw.ad_type.as_str() {
            "HD" => polar_hydrogens.push(raw.coordinate),
            "H" => {}
            t => {
                if let Some(xs) = XsType::from_autodock(t) {
                    atoms.push(Atom::new(raw.serial, raw.name, raw.coordinate, xs));
                }
            }
        }
    }

    resolve_types(&mut atoms, &polar_hydrogens);
    Ok(Receptor::new(atoms))
}

/// Parses a flexible ligand record: ROOT / BRANCH / ENDBRANCH build the
/// torsion tree; parsing stops after TORSDOF. Unsupported heavy elements
/// are an error, so a malformed library record can be skipped as a whole.
pub fn parse_ligand(text: &str) -> Result<Ligand, IoError> {
    let mut atoms: Vec<Atom> = Vec::new();
    let mut polar_hydrogens = Vec::new();
    let mut serial_to_index: HashMap<u32, usize> = HashMap::new();

    // Frame serials are resolved to atom indices once all atoms are known.
    struct PendingFrame {
        parent: Option<usize>,
        rotor_x_serial: u32,
        rotor_y_serial: u32,
        atoms: Vec<usize>,
    }
    let mut frames: Vec<PendingFrame> = Vec::new();
    let mut stack: Vec<usize> = Vec::new();

    for (i, line) in text.lines().enumerate() {
        let line_number = i + 1;
        if line.starts_with("ROOT") {
            frames.push(PendingFrame {
                parent: None,
                rotor_x_serial: 0,
                rotor_y_serial: 0,
                atoms: Vec::new(),
            });
            stack.push(0);
        } else if line.starts_with("ATOM") || line.starts_with("HETATM") {
            let raw = parse_atom_record(line, line_number)?;
            match raw.ad_type.as_str() {
                "HD" => polar_hydrogens.push(raw.coordinate),
                "H" => {}
                t => {
                    let xs = XsType::from_autodock(t).ok_or_else(|| {
                        parse_error(line_number, format!("unsupported atom type: {t}"))
                    })?;
                    let frame = *stack
                        .last()
                        .ok_or_else(|| parse_error(line_number, "atom before ROOT"))?;
                    let index = atoms.len();
                    serial_to_index.insert(raw.serial, index);
                    atoms.push(Atom::new(raw.serial, raw.name, raw.coordinate, xs));
                    frames[frame].atoms.push(index);
                }
            }
        } else if line.starts_with("BRANCH") {
            let mut parts = line.split_whitespace().skip(1);
            let x: u32 = parts
                .next()
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| parse_error(line_number, "bad BRANCH record"))?;
            let y: u32 = parts
                .next()
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| parse_error(line_number, "bad BRANCH record"))?;
            let parent = *stack
                .last()
                .ok_or_else(|| parse_error(line_number, "BRANCH before ROOT"))?;
            frames.push(PendingFrame {
                parent: Some(parent),
                rotor_x_serial: x,
                rotor_y_serial: y,
                atoms: Vec::new(),
            });
            stack.push(frames.len() - 1);
        } else if line.starts_with("ENDBRANCH") {
            stack
                .pop()
                .ok_or_else(|| parse_error(line_number, "unmatched ENDBRANCH"))?;
        } else if line.starts_with("TORSDOF") {
            break;
        }
    }

    resolve_types(&mut atoms, &polar_hydrogens);

    let specs = frames
        .into_iter()
        .enumerate()
        .map(|(i, f)| {
            let resolve = |serial: u32| {
                serial_to_index
                    .get(&serial)
                    .copied()
                    .ok_or_else(|| parse_error(0, format!("frame {i} references serial {serial}")))
            };
            Ok(FrameSpec {
                parent: f.parent,
                rotor_x: if f.parent.is_some() {
                    resolve(f.rotor_x_serial)?
                } else {
                    0
                },
                rotor_y: if f.parent.is_some() {
                    resolve(f.rotor_y_serial)?
                } else {
                    0
                },
                atoms: f.atoms,
            })
        })
        .collect::<Result<Vec<_>, IoError>>()?;

    Ok(Ligand::assemble(atoms, specs)?)
}

/// Buffered writer for the per-slice summary CSV. Opening truncates any
/// stale file from an interrupted run.
pub struct SliceCsv {
    writer: BufWriter<File>,
}

impl SliceCsv {
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self, IoError> {
        Ok(Self {
            writer: BufWriter::new(File::create(path)?),
        })
    }

    /// Appends one `id,energy` row with fixed 3-decimal formatting.
    pub fn write_row(&mut self, id: &str, e_nd: Fl) -> Result<(), IoError> {
        writeln!(self.writer, "{id},{e_nd:.3}")?;
        Ok(())
    }

    pub fn finish(mut self) -> Result<(), IoError> {
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn atom_line(serial: u32, name: &str, x: Fl, y: Fl, z: Fl, ad: &str) -> String {
        format!(
            "ATOM  {serial:>5} {name:<4} LIG A   1    {x:8.3}{y:8.3}{z:8.3}  0.00  0.00    +0.000 {ad:<2}"
        )
    }

    #[test]
    fn receptor_parsing_resolves_types() {
        let text = [
            atom_line(1, "C1", 0.0, 0.0, 0.0, "C"),
            atom_line(2, "O1", 1.4, 0.0, 0.0, "OA"),
            atom_line(3, "H1", 2.0, 0.7, 0.0, "HD"),
            atom_line(4, "C2", 10.0, 0.0, 0.0, "C"),
            atom_line(5, "W", 20.0, 0.0, 0.0, "W"),
        ]
        .join("\n");
        let receptor = parse_receptor(&text).unwrap();

        // The unsupported W record is dropped, hydrogens are consumed.
        assert_eq!(receptor.atoms.len(), 3);
        // C1 is bonded to the oxygen: polar carbon.
        assert_eq!(receptor.atoms[0].xs, XsType::CP);
        // The oxygen carries a polar hydrogen: donor-acceptor.
        assert_eq!(receptor.atoms[1].xs, XsType::ODA);
        // The lone carbon stays hydrophobic.
        assert_eq!(receptor.atoms[2].xs, XsType::CH);
    }

    #[test]
    fn ligand_parsing_builds_torsion_tree() {
        let text = [
            "ROOT".to_string(),
            atom_line(1, "C1", 0.0, 0.0, 0.0, "C"),
            atom_line(2, "C2", 1.5, 0.0, 0.0, "C"),
            "ENDROOT".to_string(),
            "BRANCH   2   3".to_string(),
            atom_line(3, "C3", 3.0, 0.0, 0.0, "C"),
            atom_line(4, "O1", 4.5, 0.5, 0.0, "OA"),
            "ENDBRANCH   2   3".to_string(),
            "TORSDOF 1".to_string(),
        ]
        .join("\n");
        let lig = parse_ligand(&text).unwrap();

        assert_eq!(lig.num_heavy_atoms, 4);
        assert_eq!(lig.num_torsions, 1);
        assert_eq!(lig.frames.len(), 2);
        assert_eq!(lig.frames[1].rotor_x, 1);
        assert_eq!(lig.frames[1].rotor_y, 2);
        assert_eq!(lig.frames[1].atoms, vec![2, 3]);
        assert_eq!(lig.xs_types(), vec![XsType::CH, XsType::CP, XsType::OA]);
    }

    #[test]
    fn ligand_with_unknown_heavy_atom_is_an_error() {
        let text = [
            "ROOT".to_string(),
            atom_line(1, "X1", 0.0, 0.0, 0.0, "XX"),
            "ENDROOT".to_string(),
            "TORSDOF 0".to_string(),
        ]
        .join("\n");
        assert!(parse_ligand(&text).is_err());
    }

    #[test]
    fn parsing_stops_at_torsdof() {
        let text = [
            "ROOT".to_string(),
            atom_line(1, "C1", 0.0, 0.0, 0.0, "C"),
            "ENDROOT".to_string(),
            "TORSDOF 0".to_string(),
            "garbage that must not be read".to_string(),
        ]
        .join("\n");
        assert!(parse_ligand(&text).is_ok());
    }

    #[test]
    fn atom_record_coordinates() {
        let line = atom_line(7, "N1", -1.25, 3.5, 0.125, "N");
        let raw = parse_atom_record(&line, 1).unwrap();
        assert_eq!(raw.serial, 7);
        assert_eq!(raw.name, "N1");
        assert_relative_eq!(raw.coordinate.x, -1.25);
        assert_relative_eq!(raw.coordinate.y, 3.5);
        assert_relative_eq!(raw.coordinate.z, 0.125);
        assert_eq!(raw.ad_type, "N");
    }

    #[test]
    fn csv_rows_use_three_decimals() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("slice.csv");
        let mut csv = SliceCsv::create(&path).unwrap();
        csv.write_row("ZINC0001", -9.1234).unwrap();
        csv.write_row("ZINC0002", -8.5).unwrap();
        csv.finish().unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "ZINC0001,-9.123\nZINC0002,-8.500\n");
    }
}
