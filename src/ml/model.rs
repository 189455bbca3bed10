use burn::{
    nn::{
        attention::{generate_autoregressive_mask, MhaInput, MultiHeadAttention, MultiHeadAttentionConfig},
        Dropout, DropoutConfig,
        Embedding, EmbeddingConfig,
        LayerNorm, LayerNormConfig,
        Linear, LinearConfig,
    },
    prelude::*,
};

use crate::data::dataset::PAD_ID;

// NOTE: #[derive(Config)] already generates Clone and Serialize/Deserialize
// internally — do NOT add them again or you get conflicting impls.
#[derive(Config, Debug)]
pub struct StyleLmConfig {
    pub vocab_size:  usize,
    pub max_seq_len: usize,
    pub d_model:     usize,
    pub num_heads:   usize,
    pub num_layers:  usize,
    pub d_ff:        usize,
    pub dropout:     f64,
}

impl StyleLmConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> StyleLmModel<B> {
        let token_embedding    = EmbeddingConfig::new(self.vocab_size, self.d_model).init(device);
        let position_embedding = EmbeddingConfig::new(self.max_seq_len, self.d_model).init(device);
        let layers: Vec<DecoderBlock<B>> = (0..self.num_layers)
            .map(|_| self.build_decoder_block(device))
            .collect();
        let final_norm = LayerNormConfig::new(self.d_model).init(device);
        let lm_head    = LinearConfig::new(self.d_model, self.vocab_size).init(device);
        let dropout    = DropoutConfig::new(self.dropout).init();
        StyleLmModel {
            token_embedding, position_embedding, layers,
            final_norm, lm_head, dropout,
            max_seq_len: self.max_seq_len,
        }
    }

    fn build_decoder_block<B: Backend>(&self, device: &B::Device) -> DecoderBlock<B> {
        let self_attn   = MultiHeadAttentionConfig::new(self.d_model, self.num_heads)
            .with_dropout(self.dropout)
            .init(device);
        let ffn_linear1 = LinearConfig::new(self.d_model, self.d_ff).init(device);
        let ffn_linear2 = LinearConfig::new(self.d_ff, self.d_model).init(device);
        let norm1   = LayerNormConfig::new(self.d_model).init(device);
        let norm2   = LayerNormConfig::new(self.d_model).init(device);
        let dropout = DropoutConfig::new(self.dropout).init();
        DecoderBlock { self_attn, ffn_linear1, ffn_linear2, norm1, norm2, dropout }
    }
}

#[derive(Module, Debug)]
pub struct DecoderBlock<B: Backend> {
    pub self_attn:   MultiHeadAttention<B>,
    pub ffn_linear1: Linear<B>,
    pub ffn_linear2: Linear<B>,
    pub norm1:       LayerNorm<B>,
    pub norm2:       LayerNorm<B>,
    pub dropout:     Dropout,
}

impl<B: Backend> DecoderBlock<B> {
    pub fn forward(&self, x: Tensor<B, 3>, mask: Tensor<B, 3, Bool>) -> Tensor<B, 3> {
        let attn_input  = MhaInput::self_attn(x.clone()).mask_attn(mask);
        let attn_output = self.self_attn.forward(attn_input).context;
        let x = self.norm1.forward(x + self.dropout.forward(attn_output));
        let ffn_out = self.ffn_linear2.forward(
            burn::tensor::activation::gelu(self.ffn_linear1.forward(x.clone()))
        );
        self.norm2.forward(x + self.dropout.forward(ffn_out))
    }
}

#[derive(Module, Debug)]
pub struct StyleLmModel<B: Backend> {
    pub token_embedding:    Embedding<B>,
    pub position_embedding: Embedding<B>,
    pub layers:             Vec<DecoderBlock<B>>,
    pub final_norm:         LayerNorm<B>,
    pub lm_head:            Linear<B>,
    pub dropout:            Dropout,
    pub max_seq_len:        usize,
}

impl<B: Backend> StyleLmModel<B> {
    /// input_ids: [batch, seq_len] → next-token logits: [batch, seq_len, vocab]
    pub fn forward(&self, input_ids: Tensor<B, 2, Int>) -> Tensor<B, 3> {
        let [batch_size, seq_len] = input_ids.dims();
        let device = input_ids.device();

        let tok_emb = self.token_embedding.forward(input_ids);

        // Self-attention is permutation-invariant, so position must be injected explicitly.
        let positions = Tensor::<B, 1, Int>::arange(0..seq_len as i64, &device)
            .unsqueeze::<2>()
            .expand([batch_size, seq_len]);
        let pos_emb = self.position_embedding.forward(positions);

        // Causal mask: each position may only attend to itself and earlier positions.
        let mask = generate_autoregressive_mask::<B>(batch_size, seq_len, &device);

        let mut x = self.dropout.forward(tok_emb + pos_emb);
        for layer in &self.layers {
            x = layer.forward(x, mask.clone());
        }
        let x = self.final_norm.forward(x); // [batch, seq_len, d_model]

        self.lm_head.forward(x)
    }

    /// Next-token-prediction loss: logits at position t are scored
    /// against the token at t+1. Padding positions are ignored.
    pub fn forward_loss(&self, input_ids: Tensor<B, 2, Int>) -> Tensor<B, 1> {
        let [batch_size, seq_len] = input_ids.dims();
        let logits = self.forward(input_ids.clone());
        let [_, _, vocab_size] = logits.dims();

        // Shift: predictions for positions [0, s-1) target tokens [1, s)
        let logits = logits
            .slice([0..batch_size, 0..seq_len - 1, 0..vocab_size])
            .reshape([batch_size * (seq_len - 1), vocab_size]);
        let targets = input_ids
            .slice([0..batch_size, 1..seq_len])
            .reshape([batch_size * (seq_len - 1)]);

        let ce = burn::nn::loss::CrossEntropyLossConfig::new()
            .with_pad_tokens(Some(vec![PAD_ID as usize]))
            .init(&logits.device());
        ce.forward(logits, targets)
    }
}
