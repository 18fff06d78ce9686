//! Request loop of the engine process

use super::NgramModel;
use crate::model::protocol::{Request, ERROR_PREFIX};
use std::io::{BufRead, Write};
use tracing::{debug, warn};

/// Continuations returned per prediction request
const PREDICTIONS: usize = 10;

/// Answer requests from `input` until EOF.
pub fn serve<R: BufRead, W: Write>(model: &NgramModel, input: R, mut output: W) -> std::io::Result<()> {
    let mut served = 0usize;
    for line in input.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match Request::decode(&line) {
            Ok(Request::CrossEntropy(tokens)) => {
                writeln!(output, "{}", model.cross_entropy(&tokens))?;
            }
            Ok(Request::Predict(tokens)) => {
                for prediction in model.predict(&tokens, PREDICTIONS) {
                    writeln!(output, "{}", prediction.encode())?;
                }
                writeln!(output)?;
            }
            Err(e) => {
                warn!("Rejecting request: {}", e);
                writeln!(output, "{}{}", ERROR_PREFIX, e)?;
            }
        }
        output.flush()?;
        served += 1;
    }
    debug!("Input closed after {} requests", served);
    Ok(())
}
