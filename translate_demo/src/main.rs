use ndarray::Array2;
use rand::Rng;
use seq2seq_transformer::{Transformer, TransformerConfig};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = TransformerConfig {
        vocab_size: 100,
        n_encoder_layers: 2,
        n_decoder_layers: 2,
        n_encoder_heads: 4,
        n_decoder_heads: 4,
        embed_size: 32,
        d_ff: 64,
        max_len: 32,
        tie_embeddings: true,
        post_ln: true,
        use_additional_dropout: false,
        xavier_initialization: true,
    };
    let vocab_size = config.vocab_size;
    let mut rng = rand::thread_rng();
    let src = Array2::from_shape_fn((2, 6), |_| rng.gen_range(0..vocab_size));
    let tgt = Array2::from_shape_fn((2, 4), |_| rng.gen_range(0..vocab_size));

    let mut model = Transformer::new(config)?;
    println!("model has {} parameters", model.num_parameters());

    let logits = model.forward(&src, &tgt, None)?;
    println!("logits shape: {:?}", logits.shape());

    let checkpoint = std::env::temp_dir().join("translate_demo_checkpoint");
    model.save(&checkpoint)?;
    let mut restored = Transformer::load(&checkpoint)?;
    let logits_restored = restored.forward(&src, &tgt, None)?;
    let max_diff = logits
        .iter()
        .zip(logits_restored.iter())
        .map(|(a, b)| (a - b).abs())
        .fold(0.0f32, f32::max);
    println!("max logit difference after reload: {max_diff}");
    Ok(())
}
