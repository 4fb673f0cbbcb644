//! Hex dumps for wire tracing.

const HEX: &[u8; 16] = b"0123456789ABCDEF";

const HEADER: &str = "       +--------------------------------------------------+\n       |  0  1  2  3  4  5  6  7   8  9  a  b  c  d  e  f |\n+------+--------------------------------------------------+------------------+\n|000000| ";
const FOOTER: &str = "+------+--------------------------------------------------+------------------+\n";
const FOOTER_TRUNCATED: &str =
    "+------+-------------------truncated----------------------+------------------+\n";

/// Render at most `limit` bytes of `data` as a boxed hex/ascii table.
///
/// Returns an empty string for empty input.
pub fn dump(data: &[u8], limit: usize) -> String {
    if data.is_empty() {
        return String::new();
    }

    let shown = &data[..data.len().min(limit)];
    let mut out = String::with_capacity(HEADER.len() + shown.len() * 4 + 160);
    out.push_str(HEADER);

    let mut ascii = [b' '; 16];
    let mut col = 0usize;
    let mut line = 1usize;

    for (i, &b) in shown.iter().enumerate() {
        out.push(char::from(HEX[usize::from(b >> 4)]));
        out.push(char::from(HEX[usize::from(b & 0x0F)]));
        out.push(' ');
        ascii[col] = if (32..127).contains(&b) { b } else { b'.' };
        col += 1;

        if col == 8 {
            out.push(' ');
        }
        if col == 16 {
            push_ascii(&mut out, &ascii);
            if i + 1 != shown.len() {
                out.push_str(&format!("|{:06X}| ", line * 16));
                line += 1;
            }
            col = 0;
        }
    }

    if col > 0 {
        let mut pad = col;
        if pad < 8 {
            while pad < 8 {
                out.push_str("   ");
                pad += 1;
            }
            out.push(' ');
        }
        while pad < 16 {
            out.push_str("   ");
            pad += 1;
        }
        for slot in ascii.iter_mut().skip(col) {
            *slot = b' ';
        }
        push_ascii(&mut out, &ascii);
    }

    if data.len() > limit {
        out.push_str(FOOTER_TRUNCATED);
    } else {
        out.push_str(FOOTER);
    }
    out
}

/// Render a frame header followed by its payload.
pub fn dump_frame(header: &[u8; 4], payload: &[u8], limit: usize) -> String {
    let mut complete = Vec::with_capacity(payload.len() + 4);
    complete.extend_from_slice(header);
    complete.extend_from_slice(payload);
    dump(&complete, limit)
}

fn push_ascii(out: &mut String, ascii: &[u8; 16]) {
    out.push_str("| ");
    out.extend(ascii.iter().map(|b| char::from(*b)));
    out.push_str(" |\n");
}
