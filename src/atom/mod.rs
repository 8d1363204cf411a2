//! Heavy-atom typing and atom representation.
//!
//! Atom-type polymorphism is a small closed set of XScore categories, so the
//! type is a plain enum convertible to and from a table index.

use crate::math::{Fl, Vec3};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of XScore heavy-atom types.
pub const XS_TYPE_SIZE: usize = 17;

/// XScore heavy-atom categories. Suffixes: `H` hydrophobic, `P` polar,
/// `D` hydrogen-bond donor, `A` acceptor, `DA` both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum XsType {
    CH,
    CP,
    NP,
    ND,
    NA,
    NDA,
    OP,
    OD,
    OA,
    ODA,
    SP,
    PP,
    FH,
    ClH,
    BrH,
    IH,
    MetD,
}

impl XsType {
    /// All types in table order.
    pub const ALL: [XsType; XS_TYPE_SIZE] = [
        XsType::CH,
        XsType::CP,
        XsType::NP,
        XsType::ND,
        XsType::NA,
        XsType::NDA,
        XsType::OP,
        XsType::OD,
        XsType::OA,
        XsType::ODA,
        XsType::SP,
        XsType::PP,
        XsType::FH,
        XsType::ClH,
        XsType::BrH,
        XsType::IH,
        XsType::MetD,
    ];

    /// Index into symmetric scoring tables and the grid-map family.
    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(i: usize) -> Option<XsType> {
        Self::ALL.get(i).copied()
    }

    /// XScore van der Waals radius in Angstroms.
    pub fn radius(self) -> Fl {
        match self {
            XsType::CH | XsType::CP => 1.9,
            XsType::NP | XsType::ND | XsType::NA | XsType::NDA => 1.8,
            XsType::OP | XsType::OD | XsType::OA | XsType::ODA => 1.7,
            XsType::SP => 2.0,
            XsType::PP => 2.1,
            XsType::FH => 1.5,
            XsType::ClH => 1.8,
            XsType::BrH => 2.0,
            XsType::IH => 2.2,
            XsType::MetD => 1.2,
        }
    }

    /// Covalent radius in Angstroms, for neighbor inference.
    pub fn covalent_radius(self) -> Fl {
        match self {
            XsType::CH | XsType::CP => 0.77,
            XsType::NP | XsType::ND | XsType::NA | XsType::NDA => 0.75,
            XsType::OP | XsType::OD | XsType::OA | XsType::ODA => 0.73,
            XsType::SP => 1.02,
            XsType::PP => 1.06,
            XsType::FH => 0.71,
            XsType::ClH => 0.99,
            XsType::BrH => 1.14,
            XsType::IH => 1.33,
            XsType::MetD => 1.30,
        }
    }

    pub fn is_hydrophobic(self) -> bool {
        matches!(
            self,
            XsType::CH | XsType::FH | XsType::ClH | XsType::BrH | XsType::IH
        )
    }

    pub fn is_donor(self) -> bool {
        matches!(
            self,
            XsType::ND | XsType::NDA | XsType::OD | XsType::ODA | XsType::MetD
        )
    }

    pub fn is_acceptor(self) -> bool {
        matches!(self, XsType::NA | XsType::NDA | XsType::OA | XsType::ODA)
    }

    /// True if one side donates and the other accepts.
    pub fn is_hbond_pair(t1: XsType, t2: XsType) -> bool {
        (t1.is_donor() && t2.is_acceptor()) || (t1.is_acceptor() && t2.is_donor())
    }

    /// Promotes a nitrogen or oxygen type to its donor variant. Used when a
    /// polar hydrogen is found covalently bound during parsing.
    pub fn to_donor(self) -> XsType {
        match self {
            XsType::NP => XsType::ND,
            XsType::NA => XsType::NDA,
            XsType::OP => XsType::OD,
            XsType::OA => XsType::ODA,
            other => other,
        }
    }

    /// Maps an AutoDock atom-type string (PDBQT columns 78-79) to the XScore
    /// category of a heavy atom. Hydrogens and unsupported elements map to
    /// `None`. Donor promotion and polar-carbon demotion happen later, once
    /// connectivity is known.
    pub fn from_autodock(s: &str) -> Option<XsType> {
        match s.trim() {
            "C" | "A" => Some(XsType::CH),
            "N" => Some(XsType::NP),
            "NA" => Some(XsType::NA),
            "O" | "OS" => Some(XsType::OP),
            "OA" => Some(XsType::OA),
            "S" | "SA" => Some(XsType::SP),
            "P" => Some(XsType::PP),
            "F" => Some(XsType::FH),
            "Cl" | "CL" => Some(XsType::ClH),
            "Br" | "BR" => Some(XsType::BrH),
            "I" => Some(XsType::IH),
            "Zn" | "ZN" | "Ca" | "CA" | "Mn" | "MN" | "Mg" | "MG" | "Fe" | "FE" | "Cu" | "CU"
            | "Ni" | "NI" => Some(XsType::MetD),
            _ => None,
        }
    }

    /// True for elements whose covalent neighbors turn carbon polar.
    pub fn is_heteroatom(self) -> bool {
        !matches!(self, XsType::CH | XsType::CP)
    }
}

impl fmt::Display for XsType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            XsType::CH => "C_H",
            XsType::CP => "C_P",
            XsType::NP => "N_P",
            XsType::ND => "N_D",
            XsType::NA => "N_A",
            XsType::NDA => "N_DA",
            XsType::OP => "O_P",
            XsType::OD => "O_D",
            XsType::OA => "O_A",
            XsType::ODA => "O_DA",
            XsType::SP => "S_P",
            XsType::PP => "P_P",
            XsType::FH => "F_H",
            XsType::ClH => "Cl_H",
            XsType::BrH => "Br_H",
            XsType::IH => "I_H",
            XsType::MetD => "Met_D",
        };
        f.write_str(s)
    }
}

/// A heavy atom with its XScore type and Cartesian coordinate.
#[derive(Debug, Clone)]
pub struct Atom {
    /// Serial number from the source record, used to resolve branch frames.
    pub serial: u32,

    /// Atom name, e.g. "CA".
    pub name: String,

    /// Coordinate in Angstroms.
    pub coordinate: Vec3,

    /// XScore heavy-atom category.
    pub xs: XsType,
}

impl Atom {
    pub fn new(serial: u32, name: String, coordinate: Vec3, xs: XsType) -> Self {
        Self {
            serial,
            name,
            coordinate,
            xs,
        }
    }

    /// Squared distance to another atom.
    #[inline]
    pub fn distance_sqr(&self, other: &Atom) -> Fl {
        crate::math::distance_sqr(&self.coordinate, &other.coordinate)
    }
}
