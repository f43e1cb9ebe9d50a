/*
 Copyright (c) 2026 pcmrate contributors

 This file is part of pcmrate

 pcmrate is free software: you can redistribute it and/or modify it
 under the terms of the GNU General Public License as published by the
 Free Software Foundation, either version 3 of the License, or
 (at your option) any later version.

 pcmrate is distributed in the hope that it will be useful, but
 WITHOUT ANY WARRANTY; without even the implied warranty of
 MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 GNU General Public License for more details.
 You should have received a copy of the GNU General Public License
 along with pcmrate. If not, see <https://www.gnu.org/licenses/>.
*/

use std::error::Error;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::thread::available_parallelism;
use std::time::Instant;

use clap::Parser;
use colored::Colorize;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use indicatif_log_bridge::LogWrapper;
use log::{info, warn};
use rayon::iter::{IntoParallelRefIterator, ParallelIterator};

use pcmrate::{
    ColorLogger, FilterInterpolation, FilterMode, Flags, Format, Method, Options, Resampler,
    Sample, TermResult,
};

#[derive(Parser, Debug)]
#[command(
    name = "pcmrate",
    about = "Resample raw (headerless) PCM audio between sample rates",
    version
)]
struct Cli {
    /// Input sample rate in Hz
    #[arg(short = 'i', long = "in-rate")]
    in_rate: u32,

    /// Output sample rate in Hz
    #[arg(short = 'r', long = "rate")]
    out_rate: u32,

    /// Number of channels
    #[arg(short = 'c', long = "channels", default_value = "2")]
    channels: usize,

    /// Sample format: s16, s32, f32, or f64 (little endian)
    #[arg(short = 'f', long = "fmt", default_value = "s16")]
    format: String,

    /// Resampling method: N (nearest), L (linear), C (cubic),
    /// B (Blackman-Nuttall), K (Kaiser)
    #[arg(short = 'm', long = "method", default_value = "K")]
    method: char,

    /// Quality preset, 0 (fastest) through 10 (best)
    #[arg(short = 'q', long = "quality", default_value = "4")]
    quality: u32,

    /// Output directory. Must already exist.
    /// [default: same as input file]
    #[arg(short = 'p', long = "path", default_value = None)]
    path: Option<PathBuf>,

    /// Override the normalized passband edge (1.0 = Nyquist)
    #[arg(long = "cutoff")]
    cutoff: Option<f64>,

    /// Override the Kaiser stopband attenuation in dB
    #[arg(long = "stop-attenuation")]
    stop_attenuation: Option<f64>,

    /// Override the Kaiser transition bandwidth (normalized)
    #[arg(long = "transition-bandwidth")]
    transition_bandwidth: Option<f64>,

    /// Cubic BC-spline B parameter
    #[arg(long = "cubic-b")]
    cubic_b: Option<f64>,

    /// Cubic BC-spline C parameter
    #[arg(long = "cubic-c")]
    cubic_c: Option<f64>,

    /// Override the designed tap count
    #[arg(long = "n-taps")]
    n_taps: Option<u32>,

    /// Coefficient table layout: auto, full, or interpolated
    #[arg(long = "filter-mode")]
    filter_mode: Option<String>,

    /// Phase interpolation: none, linear, or cubic
    #[arg(long = "filter-interpolation")]
    filter_interpolation: Option<String>,

    /// Precomputed phase rows in interpolated mode (power of two)
    #[arg(long = "filter-oversample")]
    filter_oversample: Option<u32>,

    /// Tolerated phase error when folding common rate factors
    #[arg(long = "max-phase-error")]
    max_phase_error: Option<f64>,

    /// Print diagnostic messages
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,

    /// Suppress everything except errors
    #[arg(short = 'Q', long = "quiet")]
    quiet: bool,

    /// Input files (use - for stdin/stdout)
    #[arg(name = "FILES")]
    files: Vec<PathBuf>,
}

fn main() -> TermResult {
    match run() {
        Ok(()) => TermResult(Ok(())),
        Err(e) => TermResult(Err(e.into())),
    }
}

fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let logger = ColorLogger::new(cli.quiet, cli.verbose);
    let multi = MultiProgress::new();
    LogWrapper::new(multi.clone(), logger).try_init()?;
    log::set_max_level(if cli.quiet {
        log::LevelFilter::Off
    } else if cli.verbose {
        log::LevelFilter::Trace
    } else {
        log::LevelFilter::Info
    });

    let method = parse_method(cli.method)?;
    let format: Format = cli.format.parse()?;
    let mut options = Options::for_quality(method, cli.quality, cli.in_rate, cli.out_rate)?;
    apply_overrides(&mut options, &cli)?;

    if let Some(p) = &cli.path {
        if !p.exists() {
            return Err(format!("Specified output path does not exist: {}", p.display()).into());
        }
    }

    let avail_par = available_parallelism().map(|n| n.get()).unwrap_or(1);
    let thread_count = (avail_par / 2).max(1);
    if let Err(e) = rayon::ThreadPoolBuilder::new()
        .num_threads(thread_count)
        .build_global()
    {
        warn!(
            "Rayon pool initialization error ({} threads). Details: {:?}",
            thread_count, e
        );
    }

    let mut inputs = if cli.files.is_empty() {
        vec![PathBuf::from("-")]
    } else {
        cli.files.clone()
    };
    inputs.sort();
    inputs.dedup();

    let wall_start = Instant::now();
    let mut total_inputs = 0;

    // stdin converts once, in-line; everything else fans out below
    if inputs.contains(&PathBuf::from("-")) {
        convert_stdio(&cli, method, format, &options)?;
        total_inputs += 1;
        inputs.retain(|p| p != &PathBuf::from("-"));
    }

    let paths = inputs
        .iter()
        .filter_map(|input| {
            if input.to_string_lossy().contains('*') {
                warn!(
                    "Unexpanded glob pattern detected in input: \"{}\". Skipping.",
                    input.display()
                );
                None
            } else {
                Some(input)
            }
        })
        .cloned()
        .collect::<Vec<_>>();
    total_inputs += paths.len();

    paths
        .par_iter()
        .try_for_each(|path| {
            convert_file(path, &cli, method, format, &options, &multi).map_err(|e| e.to_string())
        })
        .map_err(|e| -> Box<dyn Error> { Box::new(io::Error::new(io::ErrorKind::Other, e)) })?;

    let total_secs = wall_start.elapsed().as_secs();
    let h = total_secs / 3600;
    let m = (total_secs % 3600) / 60;
    let s = total_secs % 60;
    info!(
        "Resampled {} inputs in {:02}:{:02}:{:02}",
        total_inputs, h, m, s
    );

    Ok(())
}

fn parse_method(c: char) -> Result<Method, String> {
    match c.to_ascii_lowercase() {
        'n' => Ok(Method::Nearest),
        'l' => Ok(Method::Linear),
        'c' => Ok(Method::Cubic),
        'b' => Ok(Method::BlackmanNuttall),
        'k' => Ok(Method::Kaiser),
        other => Err(format!("Unknown method: {}", other)),
    }
}

fn apply_overrides(options: &mut Options, cli: &Cli) -> Result<(), String> {
    if let Some(v) = cli.cutoff {
        options.cutoff = Some(v);
    }
    if let Some(v) = cli.stop_attenuation {
        options.stop_attenuation = Some(v);
    }
    if let Some(v) = cli.transition_bandwidth {
        options.transition_bandwidth = Some(v);
    }
    if let Some(v) = cli.cubic_b {
        options.cubic_b = Some(v);
    }
    if let Some(v) = cli.cubic_c {
        options.cubic_c = Some(v);
    }
    if let Some(v) = cli.n_taps {
        options.n_taps = Some(v);
    }
    if let Some(v) = &cli.filter_mode {
        options.filter_mode = Some(match v.to_ascii_lowercase().as_str() {
            "auto" => FilterMode::Auto,
            "full" => FilterMode::Full,
            "interpolated" => FilterMode::Interpolated,
            other => return Err(format!("Unknown filter mode: {}", other)),
        });
    }
    if let Some(v) = &cli.filter_interpolation {
        options.filter_interpolation = Some(match v.to_ascii_lowercase().as_str() {
            "none" => FilterInterpolation::None,
            "linear" => FilterInterpolation::Linear,
            "cubic" => FilterInterpolation::Cubic,
            other => return Err(format!("Unknown filter interpolation: {}", other)),
        });
    }
    if let Some(v) = cli.filter_oversample {
        options.filter_oversample = Some(v);
    }
    if let Some(v) = cli.max_phase_error {
        options.max_phase_error = Some(v);
    }
    Ok(())
}

fn output_path(input: &Path, out_dir: &Option<PathBuf>, rate: u32) -> PathBuf {
    let stem = input.file_stem().unwrap_or_default().to_string_lossy();
    let name = format!("{}_{}.raw", stem, rate);
    match out_dir {
        Some(dir) => dir.join(name),
        None => input.parent().unwrap_or(Path::new("")).join(name),
    }
}

fn convert_stdio(
    cli: &Cli,
    method: Method,
    format: Format,
    options: &Options,
) -> Result<(), Box<dyn Error>> {
    let stdin = io::stdin();
    let stdout = io::stdout();
    let mut reader = stdin.lock();
    let mut writer = BufWriter::new(stdout.lock());
    let frames = convert_dispatch(cli, method, format, options, &mut reader, &mut writer, None)?;
    info!("stdin: wrote {} frames", frames);
    Ok(())
}

fn convert_file(
    path: &Path,
    cli: &Cli,
    method: Method,
    format: Format,
    options: &Options,
    multi: &MultiProgress,
) -> Result<(), Box<dyn Error>> {
    let file_name = match path.file_name() {
        Some(name) => name.to_string_lossy().into_owned(),
        None => return Err(format!("Invalid file path: {}", path.display()).into()),
    };

    let file = File::open(path)
        .map_err(|e| format!("Cannot open {}: {}", path.display(), e))?;
    let bytes_total = file.metadata().map(|m| m.len()).unwrap_or(0);

    let style = ProgressStyle::with_template("{prefix} {bar:20.cyan/blue} {percent}{msg}")?;
    let pg = multi
        .add(ProgressBar::new(bytes_total.max(1)))
        .with_style(style)
        .with_prefix(format!("{} {}", "[Resampling]".bold(), file_name.bold()))
        .with_message("%");

    let out_path = output_path(path, &cli.path, cli.out_rate);
    let out_file = File::create(&out_path)
        .map_err(|e| format!("Cannot create {}: {}", out_path.display(), e))?;

    let mut reader = BufReader::new(file);
    let mut writer = BufWriter::new(out_file);
    let frames = convert_dispatch(
        cli,
        method,
        format,
        options,
        &mut reader,
        &mut writer,
        Some(&pg),
    )?;
    pg.finish_and_clear();

    info!(
        "{}: wrote {} frames at {} Hz to {}",
        file_name,
        frames,
        cli.out_rate,
        out_path.display()
    );
    Ok(())
}

fn convert_dispatch(
    cli: &Cli,
    method: Method,
    format: Format,
    options: &Options,
    input: &mut dyn Read,
    output: &mut dyn Write,
    progress: Option<&ProgressBar>,
) -> Result<u64, Box<dyn Error>> {
    match format {
        Format::S16 => convert_stream::<i16>(cli, method, options, input, output, progress),
        Format::S32 => convert_stream::<i32>(cli, method, options, input, output, progress),
        Format::F32 => convert_stream::<f32>(cli, method, options, input, output, progress),
        Format::F64 => convert_stream::<f64>(cli, method, options, input, output, progress),
    }
}

const CHUNK_FRAMES: usize = 4096;

fn convert_stream<S: Sample>(
    cli: &Cli,
    method: Method,
    options: &Options,
    input: &mut dyn Read,
    output: &mut dyn Write,
    progress: Option<&ProgressBar>,
) -> Result<u64, Box<dyn Error>> {
    let channels = cli.channels;
    let mut resampler = Resampler::<S>::new(
        method,
        Flags::default(),
        channels,
        cli.in_rate,
        cli.out_rate,
        options.clone(),
    )?;

    let bpf = S::BYTES * channels;
    let mut raw_in = vec![0u8; CHUNK_FRAMES * bpf];
    let mut samples_in: Vec<S> = vec![S::default(); CHUNK_FRAMES * channels];
    let mut samples_out: Vec<S> = Vec::new();
    let mut raw_out: Vec<u8> = Vec::new();
    let mut total_frames: u64 = 0;

    loop {
        let nread = read_block(input, &mut raw_in)?;
        let frames = nread / bpf;
        if frames > 0 {
            let rem = nread % bpf;
            if rem != 0 {
                warn!("dropping {} trailing bytes (partial frame)", rem);
            }
            for (chunk, s) in raw_in[..frames * bpf]
                .chunks_exact(S::BYTES)
                .zip(samples_in.iter_mut())
            {
                *s = S::read_le(chunk);
            }
            total_frames += push_block(
                &mut resampler,
                Some(&samples_in[..frames * channels]),
                frames,
                channels,
                &mut samples_out,
                &mut raw_out,
                output,
            )?;
            if let Some(pb) = progress {
                pb.inc(nread as u64);
            }
        }
        if nread < raw_in.len() {
            break;
        }
    }

    // flush the filter tail with silence so trailing audio is not cut off
    let tail = resampler.max_latency();
    if tail > 0 {
        total_frames += push_block(
            &mut resampler,
            None,
            tail,
            channels,
            &mut samples_out,
            &mut raw_out,
            output,
        )?;
    }

    output.flush()?;
    Ok(total_frames)
}

fn push_block<S: Sample>(
    resampler: &mut Resampler<S>,
    block: Option<&[S]>,
    frames: usize,
    channels: usize,
    samples_out: &mut Vec<S>,
    raw_out: &mut Vec<u8>,
    output: &mut dyn Write,
) -> Result<u64, Box<dyn Error>> {
    let out_frames = resampler.out_frames(frames);
    samples_out.clear();
    samples_out.resize(out_frames * channels, S::default());
    {
        let mut out_planes = [samples_out.as_mut_slice()];
        match block {
            Some(b) => {
                let in_planes = [b];
                resampler.resample(Some(&in_planes[..]), frames, &mut out_planes[..], out_frames);
            }
            None => resampler.resample(None, frames, &mut out_planes[..], out_frames),
        }
    }

    raw_out.clear();
    raw_out.resize(samples_out.len() * S::BYTES, 0);
    for (s, chunk) in samples_out.iter().zip(raw_out.chunks_exact_mut(S::BYTES)) {
        s.write_le(chunk);
    }
    output.write_all(raw_out)?;
    Ok(out_frames as u64)
}

fn read_block(input: &mut dyn Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = input.read(&mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}
