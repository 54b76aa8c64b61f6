//! Sequence math
//!
//! Pure functions over nucleotide and protein sequences: translation,
//! reverse complement, GC content, codon usage against the E. coli K-12
//! reference table, and amino-acid composition by physico-chemical group.

use sdk::types::ToolError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Standard genetic code; `*` is a stop codon
#[rustfmt::skip]
const GENETIC_CODE: &[(&str, char)] = &[
    ("TTT", 'F'), ("TTC", 'F'), ("TTA", 'L'), ("TTG", 'L'),
    ("TCT", 'S'), ("TCC", 'S'), ("TCA", 'S'), ("TCG", 'S'),
    ("TAT", 'Y'), ("TAC", 'Y'), ("TAA", '*'), ("TAG", '*'),
    ("TGT", 'C'), ("TGC", 'C'), ("TGA", '*'), ("TGG", 'W'),
    ("CTT", 'L'), ("CTC", 'L'), ("CTA", 'L'), ("CTG", 'L'),
    ("CCT", 'P'), ("CCC", 'P'), ("CCA", 'P'), ("CCG", 'P'),
    ("CAT", 'H'), ("CAC", 'H'), ("CAA", 'Q'), ("CAG", 'Q'),
    ("CGT", 'R'), ("CGC", 'R'), ("CGA", 'R'), ("CGG", 'R'),
    ("ATT", 'I'), ("ATC", 'I'), ("ATA", 'I'), ("ATG", 'M'),
    ("ACT", 'T'), ("ACC", 'T'), ("ACA", 'T'), ("ACG", 'T'),
    ("AAT", 'N'), ("AAC", 'N'), ("AAA", 'K'), ("AAG", 'K'),
    ("AGT", 'S'), ("AGC", 'S'), ("AGA", 'R'), ("AGG", 'R'),
    ("GTT", 'V'), ("GTC", 'V'), ("GTA", 'V'), ("GTG", 'V'),
    ("GCT", 'A'), ("GCC", 'A'), ("GCA", 'A'), ("GCG", 'A'),
    ("GAT", 'D'), ("GAC", 'D'), ("GAA", 'E'), ("GAG", 'E'),
    ("GGT", 'G'), ("GGC", 'G'), ("GGA", 'G'), ("GGG", 'G'),
];

/// Share of each synonymous codon in E. coli K-12 coding sequences
#[rustfmt::skip]
const ECOLI_CODON_FREQUENCY: &[(&str, f64)] = &[
    ("TTT", 0.58), ("TTC", 0.42),
    ("TTA", 0.14), ("TTG", 0.13), ("CTT", 0.12), ("CTC", 0.10), ("CTA", 0.04), ("CTG", 0.47),
    ("TCT", 0.17), ("TCC", 0.15), ("TCA", 0.14), ("TCG", 0.14), ("AGT", 0.16), ("AGC", 0.25),
    ("TAT", 0.59), ("TAC", 0.41),
    ("TGT", 0.46), ("TGC", 0.54),
    ("TGG", 1.00),
    ("CCT", 0.18), ("CCC", 0.13), ("CCA", 0.20), ("CCG", 0.49),
    ("CAT", 0.57), ("CAC", 0.43),
    ("CAA", 0.34), ("CAG", 0.66),
    ("CGT", 0.36), ("CGC", 0.36), ("CGA", 0.07), ("CGG", 0.11), ("AGA", 0.07), ("AGG", 0.04),
    ("ATT", 0.49), ("ATC", 0.39), ("ATA", 0.11),
    ("ATG", 1.00),
    ("ACT", 0.19), ("ACC", 0.40), ("ACA", 0.17), ("ACG", 0.25),
    ("AAT", 0.49), ("AAC", 0.51),
    ("AAA", 0.74), ("AAG", 0.26),
    ("GTT", 0.28), ("GTC", 0.20), ("GTA", 0.17), ("GTG", 0.35),
    ("GCT", 0.18), ("GCC", 0.26), ("GCA", 0.23), ("GCG", 0.33),
    ("GAT", 0.63), ("GAC", 0.37),
    ("GAA", 0.68), ("GAG", 0.32),
    ("GGT", 0.35), ("GGC", 0.37), ("GGA", 0.13), ("GGG", 0.15),
];

const HYDROPHOBIC: &[char] = &['A', 'V', 'I', 'L', 'M', 'F', 'W', 'Y'];
const CHARGED: &[char] = &['R', 'K', 'D', 'E'];
const POLAR: &[char] = &['N', 'Q', 'S', 'T', 'Y'];

const HIGH_USAGE: f64 = 0.4;
const MODERATE_USAGE: f64 = 0.2;

/// Amino acid for a codon, if it is a complete ACGT triplet
pub fn amino_acid_for(codon: &str) -> Option<char> {
    GENETIC_CODE
        .iter()
        .find(|(c, _)| *c == codon)
        .map(|(_, aa)| *aa)
}

/// Reference E. coli frequency of a codon among its synonyms
pub fn ecoli_frequency(codon: &str) -> Option<f64> {
    ECOLI_CODON_FREQUENCY
        .iter()
        .find(|(c, _)| *c == codon)
        .map(|(_, f)| *f)
}

/// Normalize a nucleotide sequence: uppercase, whitespace and digits dropped, U read as T
pub fn clean_dna(sequence: &str) -> Result<String, ToolError> {
    let cleaned: String = sequence
        .chars()
        .filter(|c| !c.is_whitespace() && !c.is_ascii_digit())
        .map(|c| match c.to_ascii_uppercase() {
            'U' => 'T',
            other => other,
        })
        .collect();

    if cleaned.is_empty() {
        return Err(ToolError::InvalidParameter(
            "sequence is empty".to_string(),
        ));
    }

    if let Some(bad) = cleaned.chars().find(|c| !matches!(c, 'A' | 'C' | 'G' | 'T' | 'N')) {
        return Err(ToolError::InvalidParameter(format!(
            "sequence contains non-nucleotide character '{}'",
            bad
        )));
    }

    Ok(cleaned)
}

fn codons(dna: &str) -> impl Iterator<Item = &str> {
    (0..dna.len() / 3).map(move |i| &dna[i * 3..i * 3 + 3])
}

/// Translate in frame 1; incomplete trailing bases are ignored, ambiguous codons become `X`
pub fn translate(sequence: &str) -> Result<String, ToolError> {
    let dna = clean_dna(sequence)?;
    Ok(codons(&dna)
        .map(|codon| amino_acid_for(codon).unwrap_or('X'))
        .collect())
}

/// Reverse complement; `N` stays `N`
pub fn reverse_complement(sequence: &str) -> Result<String, ToolError> {
    let dna = clean_dna(sequence)?;
    Ok(dna
        .chars()
        .rev()
        .map(|c| match c {
            'A' => 'T',
            'T' => 'A',
            'C' => 'G',
            'G' => 'C',
            other => other,
        })
        .collect())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GcContent {
    pub length: usize,
    pub gc_count: usize,
    /// Percentage of G+C among unambiguous bases
    pub gc_percent: f64,
}

pub fn gc_content(sequence: &str) -> Result<GcContent, ToolError> {
    let dna = clean_dna(sequence)?;
    let gc_count = dna.chars().filter(|c| matches!(c, 'G' | 'C')).count();
    let called = dna.chars().filter(|c| *c != 'N').count();

    Ok(GcContent {
        length: dna.len(),
        gc_count,
        gc_percent: percent(gc_count, called),
    })
}

/// Usage class of a codon in the E. coli reference table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodonCategory {
    /// Above 40% of synonymous usage
    HighlyUsed,
    /// 20-40%
    ModeratelyUsed,
    /// Below 20%
    RarelyUsed,
}

impl CodonCategory {
    pub fn from_frequency(frequency: f64) -> Self {
        if frequency > HIGH_USAGE {
            Self::HighlyUsed
        } else if frequency > MODERATE_USAGE {
            Self::ModeratelyUsed
        } else {
            Self::RarelyUsed
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodonCount {
    pub codon: String,
    pub amino_acid: char,
    pub count: usize,
    /// Share of this codon among observed codons for the same amino acid
    pub observed_fraction: f64,
    /// Absent for stop codons
    pub reference_frequency: Option<f64>,
    pub category: Option<CodonCategory>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodonUsage {
    pub total_codons: usize,
    /// Codons containing `N`
    pub ambiguous_codons: usize,
    pub rare_codon_count: usize,
    pub codons: Vec<CodonCount>,
}

/// Count codons in frame 1 and compare each with the E. coli reference
pub fn codon_usage(sequence: &str) -> Result<CodonUsage, ToolError> {
    let dna = clean_dna(sequence)?;
    if dna.len() < 3 {
        return Err(ToolError::InvalidParameter(
            "sequence is shorter than one codon".to_string(),
        ));
    }

    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    let mut ambiguous = 0;
    for codon in codons(&dna) {
        if amino_acid_for(codon).is_some() {
            *counts.entry(codon).or_default() += 1;
        } else {
            ambiguous += 1;
        }
    }

    let mut per_amino_acid: BTreeMap<char, usize> = BTreeMap::new();
    for (codon, count) in &counts {
        if let Some(aa) = amino_acid_for(codon) {
            *per_amino_acid.entry(aa).or_default() += count;
        }
    }

    let codon_counts: Vec<CodonCount> = counts
        .iter()
        .filter_map(|(codon, count)| {
            let amino_acid = amino_acid_for(codon)?;
            let synonyms = per_amino_acid.get(&amino_acid).copied().unwrap_or(0);
            let reference_frequency = ecoli_frequency(codon);
            Some(CodonCount {
                codon: codon.to_string(),
                amino_acid,
                count: *count,
                observed_fraction: ratio(*count, synonyms),
                reference_frequency,
                category: reference_frequency.map(CodonCategory::from_frequency),
            })
        })
        .collect();

    let rare_codon_count = codon_counts
        .iter()
        .filter(|c| c.category == Some(CodonCategory::RarelyUsed))
        .map(|c| c.count)
        .sum();

    Ok(CodonUsage {
        total_codons: dna.len() / 3,
        ambiguous_codons: ambiguous,
        rare_codon_count,
        codons: codon_counts,
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupShare {
    pub count: usize,
    pub percent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AminoAcidComposition {
    pub length: usize,
    pub counts: BTreeMap<char, usize>,
    pub hydrophobic: GroupShare,
    pub charged: GroupShare,
    pub polar: GroupShare,
}

/// Residue counts and group shares of a protein sequence
pub fn amino_acid_composition(protein: &str) -> Result<AminoAcidComposition, ToolError> {
    let residues: String = protein
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '*')
        .map(|c| c.to_ascii_uppercase())
        .collect();

    if residues.is_empty() {
        return Err(ToolError::InvalidParameter(
            "protein sequence is empty".to_string(),
        ));
    }
    if let Some(bad) = residues.chars().find(|c| !c.is_ascii_uppercase()) {
        return Err(ToolError::InvalidParameter(format!(
            "protein sequence contains invalid residue '{}'",
            bad
        )));
    }

    let mut counts: BTreeMap<char, usize> = BTreeMap::new();
    for residue in residues.chars() {
        *counts.entry(residue).or_default() += 1;
    }

    let length = residues.len();
    let share = |group: &[char]| {
        let count = group.iter().map(|aa| counts.get(aa).copied().unwrap_or(0)).sum();
        GroupShare {
            count,
            percent: percent(count, length),
        }
    };

    Ok(AminoAcidComposition {
        length,
        hydrophobic: share(HYDROPHOBIC),
        charged: share(CHARGED),
        polar: share(POLAR),
        counts,
    })
}

/// Length of a 1-based inclusive interval
pub fn region_length(start: i64, end: i64) -> Result<i64, ToolError> {
    if start < 1 {
        return Err(ToolError::InvalidParameter(
            "start must be at least 1".to_string(),
        ));
    }
    if end < start {
        return Err(ToolError::InvalidParameter(
            "end must not be before start".to_string(),
        ));
    }
    Ok(end - start + 1)
}

fn ratio(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

fn percent(part: usize, whole: usize) -> f64 {
    ratio(part, whole) * 100.0
}
