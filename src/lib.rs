//! # pix2pix trainer
//!
//! Paired image-to-image translation with a conditional GAN, built on the
//! Burn ML framework. A U-Net generator learns to map the left half of each
//! side-by-side training photo onto its right half while a PatchGAN
//! discriminator scores overlapping patches of (input, candidate) pairs.
//!
//! ## Modules
//!
//! - [`data`]: Paired image loading, jitter/flip augmentation, shuffled batch streams
//! - [`model`]: Generator, discriminator and their building blocks
//! - [`training`]: Losses, the joint optimisation step, the epoch loop, metrics, previews
//! - [`checkpoint`]: Atomic checkpoint directories with metadata and retention
//! - [`export`]: Final generator bundles for inference
//! - [`config`]: TOML configuration loading and validation
//! - [`error`]: Structured error types

#![recursion_limit = "256"]

pub mod checkpoint;
pub mod config;
pub mod data;
pub mod error;
pub mod export;
pub mod model;
pub mod training;
