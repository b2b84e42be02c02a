//! Tab-separated export of selected sources.
//!
//! The sky table is the format the wavefront pipeline's local source
//! database ingests:
//!
//! ```text
//! # Id	 Ra		 Decl		 Mag
//! 0	10.012345	-29.998765	15.000000
//! ```
//!
//! The pixel table carries `X`/`Y` in place of `Ra`/`Decl`, for sources that
//! have not been through astrometry.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::selection::SelectedSource;

const SKY_HEADER: &str = "# Id\t Ra\t\t Decl\t\t Mag";
const PIXEL_HEADER: &str = "# Id\t X\t\t Y\t\t Mag";

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Columns written for each source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableColumns {
    /// `Ra`, `Decl` in degrees
    Sky,
    /// `X`, `Y` in pixels
    Pixel,
}

fn write_rows<W: Write>(
    writer: &mut W,
    sources: &[SelectedSource],
    columns: TableColumns,
) -> io::Result<()> {
    let header = match columns {
        TableColumns::Sky => SKY_HEADER,
        TableColumns::Pixel => PIXEL_HEADER,
    };
    writeln!(writer, "{header}")?;
    for (id, source) in sources.iter().enumerate() {
        let (a, b) = match columns {
            TableColumns::Sky => (source.ra_deg, source.dec_deg),
            TableColumns::Pixel => (source.x_center, source.y_center),
        };
        writeln!(writer, "{id}\t{a:.6}\t{b:.6}\t{:.6}", source.mag)?;
    }
    Ok(())
}

/// Write `sources` as a table to any writer.
pub fn write_source_table<W: Write>(
    writer: W,
    sources: &[SelectedSource],
    columns: TableColumns,
) -> io::Result<()> {
    let mut writer = BufWriter::new(writer);
    write_rows(&mut writer, sources, columns)?;
    writer.flush()
}

/// Write `sources` as a table to `path`, replacing any existing file.
pub fn write_source_file<P: AsRef<Path>>(
    path: P,
    sources: &[SelectedSource],
    columns: TableColumns,
) -> Result<(), CatalogError> {
    let path = path.as_ref();
    let to_err = |source| CatalogError::Io {
        path: path.to_path_buf(),
        source,
    };
    let file = File::create(path).map_err(to_err)?;
    write_source_table(file, sources, columns).map_err(to_err)?;
    log::debug!("wrote {} sources to {}", sources.len(), path.display());
    Ok(())
}
