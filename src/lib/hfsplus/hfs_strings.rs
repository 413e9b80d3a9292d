use core::cmp::Ordering;

/// High bytes of the pages the case-folding table covers. Every other page
/// folds to itself.
const FOLDED_PAGES: [u8; 10] = [0x00, 0x01, 0x03, 0x04, 0x05, 0x10, 0x20, 0x21, 0xFE, 0xFF];

/// Case mappings of the fixed HFS+ folding table as
/// `(first, last, stride, lower(first))` runs. Characters with a canonical
/// decomposition never reach the comparison and are left alone.
const FOLDS: &[(u16, u16, u16, u16)] = &[
    (0x0041, 0x005A, 1, 0x0061),
    (0x00C6, 0x00C6, 1, 0x00E6),
    (0x00D0, 0x00D0, 1, 0x00F0),
    (0x00D8, 0x00D8, 1, 0x00F8),
    (0x00DE, 0x00DE, 1, 0x00FE),
    (0x0110, 0x0110, 1, 0x0111),
    (0x0126, 0x0126, 1, 0x0127),
    (0x0132, 0x0132, 1, 0x0133),
    (0x013F, 0x013F, 1, 0x0140),
    (0x0141, 0x0141, 1, 0x0142),
    (0x014A, 0x014A, 1, 0x014B),
    (0x0152, 0x0152, 1, 0x0153),
    (0x0166, 0x0166, 1, 0x0167),
    (0x0181, 0x0181, 1, 0x0253),
    (0x0182, 0x0184, 2, 0x0183),
    (0x0186, 0x0186, 1, 0x0254),
    (0x0187, 0x0187, 1, 0x0188),
    (0x0189, 0x018A, 1, 0x0256),
    (0x018B, 0x018B, 1, 0x018C),
    (0x018E, 0x018E, 1, 0x01DD),
    (0x018F, 0x018F, 1, 0x0259),
    (0x0190, 0x0190, 1, 0x025B),
    (0x0191, 0x0191, 1, 0x0192),
    (0x0193, 0x0193, 1, 0x0260),
    (0x0194, 0x0194, 1, 0x0263),
    (0x0196, 0x0196, 1, 0x0269),
    (0x0197, 0x0197, 1, 0x0268),
    (0x0198, 0x0198, 1, 0x0199),
    (0x019C, 0x019C, 1, 0x026F),
    (0x019D, 0x019D, 1, 0x0272),
    (0x019F, 0x019F, 1, 0x0275),
    (0x01A2, 0x01A4, 2, 0x01A3),
    (0x01A7, 0x01A7, 1, 0x01A8),
    (0x01A9, 0x01A9, 1, 0x0283),
    (0x01AC, 0x01AC, 1, 0x01AD),
    (0x01AE, 0x01AE, 1, 0x0288),
    (0x01B1, 0x01B2, 1, 0x028A),
    (0x01B3, 0x01B5, 2, 0x01B4),
    (0x01B7, 0x01B7, 1, 0x0292),
    (0x01B8, 0x01B8, 1, 0x01B9),
    (0x01BC, 0x01BC, 1, 0x01BD),
    (0x01C4, 0x01C4, 1, 0x01C6),
    (0x01C5, 0x01C5, 1, 0x01C6),
    (0x01C7, 0x01C7, 1, 0x01C9),
    (0x01C8, 0x01C8, 1, 0x01C9),
    (0x01CA, 0x01CA, 1, 0x01CC),
    (0x01CB, 0x01CB, 1, 0x01CC),
    (0x01E4, 0x01E4, 1, 0x01E5),
    (0x01F1, 0x01F1, 1, 0x01F3),
    (0x01F2, 0x01F2, 1, 0x01F3),
    (0x0391, 0x03A1, 1, 0x03B1),
    (0x03A3, 0x03A9, 1, 0x03C3),
    (0x03E2, 0x03EE, 2, 0x03E3),
    (0x0402, 0x0402, 1, 0x0452),
    (0x0404, 0x0406, 1, 0x0454),
    (0x0408, 0x040B, 1, 0x0458),
    (0x040F, 0x040F, 1, 0x045F),
    (0x0410, 0x0418, 1, 0x0430),
    (0x041A, 0x042F, 1, 0x043A),
    (0x0460, 0x0474, 2, 0x0461),
    (0x0478, 0x0480, 2, 0x0479),
    (0x0490, 0x04BE, 2, 0x0491),
    (0x04C3, 0x04C3, 1, 0x04C4),
    (0x04C7, 0x04C7, 1, 0x04C8),
    (0x04CB, 0x04CB, 1, 0x04CC),
    (0x04D4, 0x04D8, 4, 0x04D5),
    (0x04E0, 0x04E0, 1, 0x04E1),
    (0x04E8, 0x04E8, 1, 0x04E9),
    (0x0531, 0x0556, 1, 0x0561),
    (0x10A0, 0x10C5, 1, 0x10D0),
    (0x2160, 0x216F, 1, 0x2170),
    (0xFF21, 0xFF3A, 1, 0xFF41),
];

/// Format characters the comparison skips.
const IGNORABLE: &[(u16, u16)] = &[
    (0x200C, 0x200F),
    (0x202A, 0x202E),
    (0x206A, 0x206F),
    (0xFEFF, 0xFEFF),
];

const fn page_slots() -> [u8; 256] {
    let mut slots = [0u8; 256];
    let mut i = 0;
    while i < FOLDED_PAGES.len() {
        slots[FOLDED_PAGES[i] as usize] = i as u8 + 1;
        i += 1;
    }
    slots
}

const fn lower_case_pages() -> [[u16; 256]; FOLDED_PAGES.len()] {
    let mut pages = [[0u16; 256]; FOLDED_PAGES.len()];
    let mut p = 0;
    while p < FOLDED_PAGES.len() {
        let mut i = 0;
        while i < 256 {
            pages[p][i] = ((FOLDED_PAGES[p] as u16) << 8) | i as u16;
            i += 1;
        }
        p += 1;
    }

    let slots = page_slots();
    let mut f = 0;
    while f < FOLDS.len() {
        let (first, last, stride, lower) = FOLDS[f];
        let mut unit = first;
        while unit <= last {
            let page = slots[(unit >> 8) as usize] as usize - 1;
            pages[page][(unit & 0xFF) as usize] = lower + (unit - first);
            unit += stride;
        }
        f += 1;
    }

    let mut g = 0;
    while g < IGNORABLE.len() {
        let (first, last) = IGNORABLE[g];
        let mut unit = first;
        while unit <= last {
            let page = slots[(unit >> 8) as usize] as usize - 1;
            pages[page][(unit & 0xFF) as usize] = 0;
            unit += 1;
        }
        g += 1;
    }

    // NUL sorts after every real character.
    pages[0][0] = 0xFFFF;
    pages
}

static PAGE_SLOTS: [u8; 256] = page_slots();
static LOWER_CASE_PAGES: [[u16; 256]; FOLDED_PAGES.len()] = lower_case_pages();

/// Case-folded value of one UTF-16 unit under `kHFSCaseFolding`. Ignorable
/// format characters fold to 0 and are skipped.
fn fold(unit: u16) -> u16 {
    match PAGE_SLOTS[(unit >> 8) as usize] {
        0 => unit,
        slot => LOWER_CASE_PAGES[slot as usize - 1][(unit & 0xFF) as usize],
    }
}

fn next_folded(units: &[u16], pos: &mut usize) -> Option<u16> {
    while *pos < units.len() {
        let folded = fold(units[*pos]);
        *pos += 1;
        if folded != 0 {
            return Some(folded);
        }
    }
    None
}

/// Compares two names the way the catalog orders them: unit by unit after
/// case folding, with a name that runs out first sorting lower.
pub(crate) fn fast_unicode_compare(a: &[u16], b: &[u16]) -> Ordering {
    let (mut i, mut j) = (0, 0);
    loop {
        match (next_folded(a, &mut i), next_folded(b, &mut j)) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(c1), Some(c2)) if c1 != c2 => return c1.cmp(&c2),
            _ => {}
        }
    }
}
